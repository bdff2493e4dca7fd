//! Reconciled output handed to presentation.

pub mod drift;
pub mod render;

pub use drift::{quota_drift, QuotaDrift, MIN_TARGET_QUOTA_BYTES};
pub use render::{render_drift, render_grants, render_record, render_report, JsonOut};

use crate::models::{GrantStatus, Scope};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Data-quality finding attached to a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    /// Storage knows the project but no grant links to it.
    NoMatchingGrant,
    OverQuota,
    GrantExpiredStillUsed,
    /// More than one active grant funds the project.
    AmbiguousLink,
    UsageUnknown,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::NoMatchingGrant => "no_matching_grant",
            Flag::OverQuota => "over_quota",
            Flag::GrantExpiredStillUsed => "grant_expired_still_used",
            Flag::AmbiguousLink => "ambiguous_link",
            Flag::UsageUnknown => "usage_unknown",
        }
    }
}

/// One project joined with the grant that funds it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciledRecord {
    pub project: String,
    /// Grant the figures below refer to; `None` when no grant or several
    /// active grants link to the project.
    pub grant_id: Option<String>,
    /// Every grant referencing the project, sorted.
    pub candidate_grants: Vec<String>,
    pub pi: Option<String>,
    pub grant_status: Option<GrantStatus>,
    pub grant_end: Option<NaiveDate>,
    pub days_remaining: Option<i64>,
    pub quota_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub usage_fraction: Option<f64>,
    pub usage_updated_at: Option<DateTime<Utc>>,
    /// Storage awarded by all active grants of the project.
    pub awarded_storage_bytes: u64,
    pub compute_hours_awarded: f64,
    pub compute_hours_used: f64,
    pub flags: BTreeSet<Flag>,
}

impl ReconciledRecord {
    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UsageUnavailable,
    UnknownProject,
    UsageTimeout,
    EnumerationFailed,
    /// A grant funds a group the accounting backend does not list.
    GroupNotListed,
}

/// Partial failure absorbed into the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportIssue {
    pub project: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl ReportIssue {
    pub fn new(project: Option<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            project,
            kind,
            message: message.into(),
        }
    }
}

/// Result of one reconciliation run. Built once, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportModel {
    scope: Scope,
    generated_at: DateTime<Utc>,
    as_of: NaiveDate,
    records: Vec<ReconciledRecord>,
    usage_unknown: usize,
    issues: Vec<ReportIssue>,
}

impl ReportModel {
    /// Sorts records by project and derives the summary counts.
    pub fn new(
        scope: Scope,
        generated_at: DateTime<Utc>,
        mut records: Vec<ReconciledRecord>,
        issues: Vec<ReportIssue>,
    ) -> Self {
        records.sort_by(|a, b| a.project.cmp(&b.project));
        let usage_unknown = records
            .iter()
            .filter(|r| r.has_flag(Flag::UsageUnknown))
            .count();
        Self {
            scope,
            as_of: generated_at.date_naive(),
            generated_at,
            records,
            usage_unknown,
            issues,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Calendar day grant status and remaining days were computed for.
    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn records(&self) -> &[ReconciledRecord] {
        &self.records
    }

    pub fn record(&self, project: &str) -> Option<&ReconciledRecord> {
        self.records
            .binary_search_by(|r| r.project.as_str().cmp(project))
            .ok()
            .map(|idx| &self.records[idx])
    }

    pub fn usage_unknown_count(&self) -> usize {
        self.usage_unknown
    }

    pub fn issues(&self) -> &[ReportIssue] {
        &self.issues
    }

    /// Partial errors absorbed during the run.
    pub fn error_count(&self) -> usize {
        self.issues.len()
    }
}
