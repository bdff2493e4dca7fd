use crate::models::{Grant, GrantStatus, UsageOutcome};
use crate::reports::{Flag, ReconciledRecord};
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Joins one project with the grants that reference it and its usage.
pub fn build_record(
    project: &str,
    grants: &[Grant],
    outcome: &UsageOutcome,
    today: NaiveDate,
) -> ReconciledRecord {
    let linked: Vec<&Grant> = grants.iter().filter(|g| g.funds(project)).collect();
    let active: Vec<&Grant> = linked
        .iter()
        .copied()
        .filter(|g| g.status_on(today) == GrantStatus::Active)
        .collect();

    let primary = match active.len() {
        1 => Some(active[0]),
        0 => most_recent(&linked),
        _ => None,
    };

    let mut flags = BTreeSet::new();
    if linked.is_empty() {
        flags.insert(Flag::NoMatchingGrant);
    }
    if active.len() > 1 {
        flags.insert(Flag::AmbiguousLink);
    }

    let usage = outcome.usage();
    match usage {
        None => {
            flags.insert(Flag::UsageUnknown);
        }
        Some(usage) => {
            if usage.is_over_quota() {
                flags.insert(Flag::OverQuota);
            }
            if usage.used_bytes > 0 && primary.map(|g| g.has_ended(today)).unwrap_or(false) {
                flags.insert(Flag::GrantExpiredStillUsed);
            }
        }
    }

    let (compute_hours_awarded, compute_hours_used) = match primary {
        Some(grant) => (grant.compute_hours_awarded(), grant.compute_hours_used()),
        None => active.iter().fold((0.0, 0.0), |(awarded, used), g| {
            (awarded + g.compute_hours_awarded(), used + g.compute_hours_used())
        }),
    };

    let mut candidate_grants: Vec<String> = linked.iter().map(|g| g.id.clone()).collect();
    candidate_grants.sort();
    candidate_grants.dedup();

    ReconciledRecord {
        project: project.to_string(),
        grant_id: primary.map(|g| g.id.clone()),
        candidate_grants,
        pi: primary.and_then(|g| g.pi.clone()),
        grant_status: primary.map(|g| g.status_on(today)),
        grant_end: primary.map(|g| g.end),
        days_remaining: primary.map(|g| g.days_remaining(today)),
        quota_bytes: usage.and_then(|u| u.quota_bytes),
        used_bytes: usage.map(|u| u.used_bytes),
        usage_fraction: usage.and_then(|u| u.usage_fraction()),
        usage_updated_at: usage.map(|u| u.updated_at),
        awarded_storage_bytes: active.iter().map(|g| g.storage_award_bytes()).sum(),
        compute_hours_awarded,
        compute_hours_used,
        flags,
    }
}

/// Latest-ending grant, ties broken by id so the pick is stable.
fn most_recent<'g>(grants: &[&'g Grant]) -> Option<&'g Grant> {
    grants
        .iter()
        .copied()
        .max_by(|a, b| a.end.cmp(&b.end).then_with(|| b.id.cmp(&a.id)))
}
