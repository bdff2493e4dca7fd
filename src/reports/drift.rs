use super::{Flag, ReportModel};
use crate::models::BYTES_PER_GB;
use serde::Serialize;

/// Smallest quota a project directory is given, even without active grants.
pub const MIN_TARGET_QUOTA_BYTES: u64 = BYTES_PER_GB;

/// Difference between a project's configured quota and what its active
/// grants award. Informational only; nothing is resized.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuotaDrift {
    pub project: String,
    pub current_quota_bytes: Option<u64>,
    pub target_quota_bytes: u64,
    pub used_bytes: u64,
}

impl QuotaDrift {
    /// Bytes the quota would have to grow (positive) or shrink (negative).
    pub fn delta_bytes(&self) -> i128 {
        self.target_quota_bytes as i128 - self.current_quota_bytes.unwrap_or(0) as i128
    }

    /// Usage would already exceed the awarded quota.
    pub fn usage_exceeds_target(&self) -> bool {
        self.used_bytes > self.target_quota_bytes
    }
}

/// Projects whose configured quota differs from the awarded storage.
/// Records without usage figures or with ambiguous links are skipped.
pub fn quota_drift(report: &ReportModel) -> Vec<QuotaDrift> {
    report
        .records()
        .iter()
        .filter(|r| !r.has_flag(Flag::UsageUnknown) && !r.has_flag(Flag::AmbiguousLink))
        .filter_map(|r| {
            let target = r.awarded_storage_bytes.max(MIN_TARGET_QUOTA_BYTES);
            if r.quota_bytes == Some(target) {
                return None;
            }
            Some(QuotaDrift {
                project: r.project.clone(),
                current_quota_bytes: r.quota_bytes,
                target_quota_bytes: target,
                used_bytes: r.used_bytes.unwrap_or(0),
            })
        })
        .collect()
}
