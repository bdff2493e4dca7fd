//! Terminal rendering. Reads report data only; never recomputes it.

use super::{QuotaDrift, ReconciledRecord, ReportModel};
use crate::models::{Allocation, Grant, BYTES_PER_GB};
use serde::Serialize;
use std::fmt::Write;

/// Envelope for `--json` output.
#[derive(Serialize)]
pub struct JsonOut<T: Serialize> {
    pub ok: bool,
    pub data: T,
}

/// Groups thousands with spaces: `1234567` → `1 234 567`.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

fn format_hours(value: f64) -> String {
    let whole = value.trunc().max(0.0) as u64;
    let cents = ((value - value.trunc()) * 100.0).round() as u64;
    if cents == 100 {
        format!("{}.00", group_thousands(whole + 1))
    } else {
        format!("{}.{cents:02}", group_thousands(whole))
    }
}

pub fn format_gb(bytes: u64) -> String {
    let gb = bytes as f64 / BYTES_PER_GB as f64;
    if gb >= 10.0 || gb == gb.trunc() {
        format!("{} GB", group_thousands(gb.round() as u64))
    } else {
        format!("{gb:.2} GB")
    }
}

fn format_delta(delta: i128) -> String {
    let sign = if delta < 0 { "-" } else { "+" };
    format!("{sign}{}", format_gb(delta.unsigned_abs() as u64))
}

fn opt_gb(bytes: Option<u64>) -> String {
    bytes.map(format_gb).unwrap_or_else(|| "-".into())
}

fn flags_label(record: &ReconciledRecord) -> String {
    if record.flags.is_empty() {
        return "ok".into();
    }
    record
        .flags
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Table of every record followed by the partial-error summary.
pub fn render_report(report: &ReportModel) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Scope: {}, as of: {}, generated: {}",
        report.scope(),
        report.as_of(),
        report.generated_at().format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(
        out,
        "{:<20} {:<24} {:<8} {:>6} {:>12} {:>12} {:>6}  FLAGS",
        "PROJECT", "GRANT", "STATUS", "DAYS", "USED", "QUOTA", "USE%"
    );
    for record in report.records() {
        let grant = record.grant_id.clone().unwrap_or_else(|| {
            if record.candidate_grants.is_empty() {
                "-".into()
            } else {
                record.candidate_grants.join("|")
            }
        });
        let _ = writeln!(
            out,
            "{:<20} {:<24} {:<8} {:>6} {:>12} {:>12} {:>6}  {}",
            record.project,
            grant,
            record.grant_status.map(|s| s.as_str()).unwrap_or("-"),
            record
                .days_remaining
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".into()),
            opt_gb(record.used_bytes),
            opt_gb(record.quota_bytes),
            record
                .usage_fraction
                .map(|f| format!("{:.1}", f * 100.0))
                .unwrap_or_else(|| "-".into()),
            flags_label(record)
        );
    }
    if report.error_count() > 0 {
        let _ = writeln!(
            out,
            "{} partial error(s), usage unknown for {} project(s):",
            report.error_count(),
            report.usage_unknown_count()
        );
        for issue in report.issues() {
            let _ = writeln!(
                out,
                "  - {}: {}",
                issue.project.as_deref().unwrap_or("(enumeration)"),
                issue.message
            );
        }
    }
    out
}

/// Detailed view of one project.
pub fn render_record(record: &ReconciledRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Project: {}", record.project);
    match &record.grant_id {
        Some(grant) => {
            let _ = writeln!(
                out,
                " grant: {grant}, pi: {}, status: {}, end: {}, days remaining: {}",
                record.pi.as_deref().unwrap_or("n/a"),
                record.grant_status.map(|s| s.as_str()).unwrap_or("n/a"),
                record
                    .grant_end
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "n/a".into()),
                record
                    .days_remaining
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "n/a".into())
            );
        }
        None if record.candidate_grants.is_empty() => {
            let _ = writeln!(out, " grant: none");
        }
        None => {
            let _ = writeln!(out, " grants: {} (unresolved)", record.candidate_grants.join(", "));
        }
    }
    let _ = writeln!(
        out,
        " storage: used {}, quota {}, awarded {}{}",
        opt_gb(record.used_bytes),
        opt_gb(record.quota_bytes),
        format_gb(record.awarded_storage_bytes),
        record
            .usage_fraction
            .map(|f| format!(" ({:.1}%)", f * 100.0))
            .unwrap_or_default()
    );
    if record.compute_hours_awarded > 0.0 || record.compute_hours_used > 0.0 {
        let _ = writeln!(
            out,
            " compute: used {} h of {} h",
            format_hours(record.compute_hours_used),
            format_hours(record.compute_hours_awarded)
        );
    }
    if let Some(updated) = record.usage_updated_at {
        let _ = writeln!(out, " usage updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let _ = writeln!(out, " flags: {}", flags_label(record));
    out
}

pub fn render_drift(drift: &[QuotaDrift]) -> String {
    if drift.is_empty() {
        return "All quotas match awarded storage.\n".into();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:>12} {:>12} {:>13} {:>12}",
        "PROJECT", "QUOTA", "AWARDED", "CHANGE", "USED"
    );
    for item in drift {
        let _ = writeln!(
            out,
            "{:<20} {:>12} {:>12} {:>13} {:>12}{}",
            item.project,
            opt_gb(item.current_quota_bytes),
            format_gb(item.target_quota_bytes),
            format_delta(item.delta_bytes()),
            format_gb(item.used_bytes),
            if item.usage_exceeds_target() { "  !" } else { "" }
        );
    }
    out
}

fn parameter_value(name: &str, value: f64) -> String {
    let suffix = match name {
        "hours" | "timelimit" => " h",
        "capacity" => " GB",
        _ => "",
    };
    if value == value.trunc() {
        format!("{}{suffix}", group_thousands(value.max(0.0) as u64))
    } else {
        format!("{value}{suffix}")
    }
}

fn ordered_parameters(allocation: &Allocation) -> Vec<(String, String)> {
    const ORDER: [&str; 3] = ["hours", "timelimit", "capacity"];
    let mut out: Vec<(String, String)> = ORDER
        .iter()
        .filter_map(|key| {
            allocation
                .parameters
                .get(*key)
                .map(|v| (key.to_string(), parameter_value(key, *v)))
        })
        .collect();
    out.extend(
        allocation
            .parameters
            .iter()
            .filter(|(k, _)| !ORDER.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), parameter_value(k, *v))),
    );
    out
}

/// Grant listing: newest first, allocations ordered by resource.
pub fn render_grants(grants: &[Grant]) -> String {
    let mut sorted: Vec<&Grant> = grants.iter().collect();
    sorted.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| a.id.cmp(&b.id)));
    let mut blocks = Vec::with_capacity(sorted.len());
    for grant in sorted {
        let mut out = String::new();
        let _ = writeln!(out, "Grant: {}", grant.id);
        let _ = writeln!(
            out,
            " status: {}, start: {}, end: {}",
            grant.status_label.as_deref().unwrap_or("unknown"),
            grant.start,
            grant.end
        );
        let mut allocations: Vec<&Allocation> = grant.allocations.iter().collect();
        allocations.sort_by(|a, b| a.resource.cmp(&b.resource));
        if allocations.is_empty() {
            let _ = writeln!(out, "  - No allocations");
        }
        for allocation in allocations {
            let _ = writeln!(
                out,
                " Allocation: {}, resource: {}",
                allocation.name, allocation.resource
            );
            let _ = writeln!(
                out,
                "  status: {}, start: {}, end: {}",
                allocation.status.as_deref().unwrap_or("n/a"),
                allocation.start.as_deref().unwrap_or("n/a"),
                allocation.end.as_deref().unwrap_or("n/a")
            );
            let params = ordered_parameters(allocation)
                .into_iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "  parameters: {params}");
            if !allocation.consumed.is_empty() {
                let consumed = allocation
                    .consumed
                    .iter()
                    .map(|(k, v)| format!("{k}: {} h", format_hours(*v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(out, "  consumed resources: {consumed}");
            }
        }
        let _ = writeln!(out, " Group: {}", grant.projects.join(", "));
        let _ = writeln!(out, "  members: {}", grant.members.join(", "));
        blocks.push(out);
    }
    blocks.join("---\n")
}
