//! Grant–storage reconciliation.
//!
//! One call fetches the grants for a scope (the only fatal step), adds the
//! backend's group listing and any enumerated storage projects, fans the
//! usage lookups out on a bounded rayon pool, and joins both sides into a
//! [`ReportModel`]. Usage failures never abort the run: the affected project
//! is kept, flagged `usage_unknown`, and listed among the report issues.

pub mod classify;

pub use classify::build_record;

use crate::config::{AppConfig, ReconcileSettings};
use crate::events::{EventLog, EventType};
use crate::models::{Scope, UsageOutcome};
use crate::registry::{BursarBackend, GrantRegistryClient, RegistryError};
use crate::reports::{IssueKind, ReportIssue, ReportModel};
use crate::storage::{StorageError, StorageUsageClient};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The grant fetch failed; there is nothing meaningful to report.
    #[error("grant fetch failed: {0}")]
    FatalBackend(#[from] RegistryError),
    #[error("failed to configure usage worker pool: {0}")]
    WorkerPool(String),
}

pub struct ReconciliationEngine {
    registry: GrantRegistryClient,
    storage: StorageUsageClient,
    settings: ReconcileSettings,
    events: Option<EventLog>,
}

impl ReconciliationEngine {
    pub fn new(
        registry: GrantRegistryClient,
        storage: StorageUsageClient,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            registry,
            storage,
            settings,
            events: None,
        }
    }

    /// Wires the Bursar registry and the configured storage backend.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let bursar = BursarBackend::from_config(config)?;
        let registry = GrantRegistryClient::new(Arc::new(bursar));
        let storage = StorageUsageClient::from_config(config)?;
        Ok(Self::new(registry, storage, config.reconcile.clone()))
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.events = Some(log);
        self
    }

    pub fn reconcile(&self, scope: &Scope) -> Result<ReportModel, ReconcileError> {
        self.reconcile_at(scope, Utc::now())
    }

    /// Reconciles as of `now`; grant status and remaining days use its date.
    pub fn reconcile_at(
        &self,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<ReportModel, ReconcileError> {
        let run_id = Uuid::new_v4();
        let today = now.date_naive();
        self.log(run_id, EventType::ReconciliationStarted, json!({ "scope": scope }));

        // Dropping the session discards its grant cache.
        let mut session = self.registry.session();
        let listing = match session.listing(scope) {
            Ok(listing) => listing,
            Err(err) => {
                self.log(
                    run_id,
                    EventType::GrantFetchFailed,
                    json!({ "scope": scope, "error": err.to_string() }),
                );
                return Err(ReconcileError::FatalBackend(err));
            }
        };
        drop(session);
        let grants = listing.grants;

        let mut issues = Vec::new();
        let mut projects: BTreeSet<String> = grants
            .iter()
            .flat_map(|g| g.projects.iter().cloned())
            .collect();
        if let Some(named) = scope.named_project() {
            projects.insert(named.to_string());
        }
        if let (Scope::All, Some(groups)) = (scope, &listing.groups) {
            for grant in &grants {
                for project in grant.projects.iter().filter(|p| !groups.contains(p)) {
                    let message = format!(
                        "grant {} references group {project} missing from the group listing",
                        grant.id
                    );
                    self.log(
                        run_id,
                        EventType::GroupNotListed,
                        json!({ "grant": grant.id, "project": project }),
                    );
                    issues.push(ReportIssue::new(
                        Some(project.clone()),
                        IssueKind::GroupNotListed,
                        message,
                    ));
                }
            }
            projects.extend(groups.iter().cloned());
        }
        if matches!(scope, Scope::All) && self.settings.reverse_lookup {
            match self.storage.enumerate_projects() {
                Ok(Some(known)) => projects.extend(known),
                Ok(None) => {}
                Err(err) => {
                    self.log(
                        run_id,
                        EventType::EnumerationFailed,
                        json!({ "error": err.to_string() }),
                    );
                    issues.push(ReportIssue::new(
                        None,
                        IssueKind::EnumerationFailed,
                        err.to_string(),
                    ));
                }
            }
        }
        let projects: Vec<String> = projects.into_iter().collect();

        let outcomes = self.fetch_usage(&projects)?;

        let mut records = Vec::with_capacity(projects.len());
        for (project, (outcome, failure)) in projects.iter().zip(outcomes) {
            if let Some(err) = failure {
                self.log(
                    run_id,
                    EventType::UsageFetchFailed,
                    json!({ "project": project, "error": err.to_string() }),
                );
                issues.push(ReportIssue::new(
                    Some(project.clone()),
                    issue_kind(&err),
                    err.to_string(),
                ));
            }
            records.push(build_record(project, &grants, &outcome, today));
        }

        let report = ReportModel::new(scope.clone(), now, records, issues);
        self.log(
            run_id,
            EventType::ReconciliationCompleted,
            json!({
                "scope": scope,
                "grants": grants.len(),
                "records": report.records().len(),
                "usage_unknown": report.usage_unknown_count(),
                "errors": report.error_count()
            }),
        );
        Ok(report)
    }

    /// One slot per project, filled in input order whatever order the
    /// lookups complete in.
    fn fetch_usage(
        &self,
        projects: &[String],
    ) -> Result<Vec<(UsageOutcome, Option<StorageError>)>, ReconcileError> {
        if projects.is_empty() {
            return Ok(Vec::new());
        }
        let concurrency = self.settings.max_parallel_fetches.max(1) as usize;
        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|idx| format!("usage-worker-{idx}"))
            .build()
            .map_err(|err| ReconcileError::WorkerPool(err.to_string()))?;
        Ok(pool.install(|| {
            projects
                .par_iter()
                .map(|project| match self.storage.fetch(project) {
                    Ok(usage) => (UsageOutcome::Known(usage), None),
                    Err(err) => (
                        UsageOutcome::Unknown {
                            reason: err.to_string(),
                        },
                        Some(err),
                    ),
                })
                .collect()
        }))
    }

    fn log(&self, run_id: Uuid, event_type: EventType, details: serde_json::Value) {
        if let Some(log) = &self.events {
            // Log write failures never fail a reconciliation.
            let _ = log.append(run_id, event_type, details);
        }
    }
}

fn issue_kind(err: &StorageError) -> IssueKind {
    match err {
        StorageError::UnknownProject(_) => IssueKind::UnknownProject,
        StorageError::Timeout { .. } => IssueKind::UsageTimeout,
        StorageError::BackendUnavailable(_) | StorageError::Unparseable { .. } => {
            IssueKind::UsageUnavailable
        }
    }
}
