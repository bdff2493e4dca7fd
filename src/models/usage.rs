use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live storage figures for one project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectUsage {
    pub project: String,
    /// Hard limit in bytes; `None` when the backend reports no limit.
    pub quota_bytes: Option<u64>,
    pub used_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProjectUsage {
    /// `used / quota`, undefined for a missing or zero quota.
    pub fn usage_fraction(&self) -> Option<f64> {
        match self.quota_bytes {
            Some(quota) if quota > 0 => Some(self.used_bytes as f64 / quota as f64),
            _ => None,
        }
    }

    pub fn is_over_quota(&self) -> bool {
        matches!(self.quota_bytes, Some(quota) if self.used_bytes > quota)
    }
}

/// Tagged result of one usage lookup; failures are expected and carried as data.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageOutcome {
    Known(ProjectUsage),
    Unknown { reason: String },
}

impl UsageOutcome {
    pub fn usage(&self) -> Option<&ProjectUsage> {
        match self {
            Self::Known(usage) => Some(usage),
            Self::Unknown { .. } => None,
        }
    }
}
