use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Bytes in one GB as the accounting backend counts storage capacity.
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Lifecycle state of a grant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Expired,
    Pending,
    Revoked,
}

impl GrantStatus {
    /// Maps the status strings the Bursar emits onto the four known states.
    pub fn from_backend(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let normalized = normalized.strip_prefix("grant_").unwrap_or(&normalized);
        match normalized {
            "active" | "accepted" => Some(Self::Active),
            "expired" | "closed" | "finished" => Some(Self::Expired),
            "pending" | "new" | "waiting" | "submitted" => Some(Self::Pending),
            "revoked" | "rejected" | "canceled" | "cancelled" => Some(Self::Revoked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Pending => "pending",
            Self::Revoked => "revoked",
        }
    }
}

/// One resource allocation inside a grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub name: String,
    pub resource: String,
    pub status: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    /// Numeric parameters (`hours`, `timelimit`, `capacity`, ...).
    pub parameters: BTreeMap<String, f64>,
    /// Consumed resources reported under `allocations_usages`.
    pub consumed: BTreeMap<String, f64>,
}

impl Allocation {
    pub fn is_storage(&self) -> bool {
        self.resource.eq_ignore_ascii_case("storage")
    }
}

/// Typed grant record, parsed once from the accounting backend payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grant {
    pub id: String,
    pub pi: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Status as reported by the backend, when it was recognisable.
    pub reported_status: Option<GrantStatus>,
    /// Backend status string, verbatim.
    pub status_label: Option<String>,
    /// Projects funded by this grant, deduplicated and sorted.
    pub projects: Vec<String>,
    pub members: Vec<String>,
    pub allocations: Vec<Allocation>,
}

impl Grant {
    /// Status effective on `today`.
    ///
    /// Revocation always wins. An end date in the past means expired
    /// whatever the backend says; otherwise the backend status is used and,
    /// when absent, the dates decide.
    pub fn status_on(&self, today: NaiveDate) -> GrantStatus {
        if self.reported_status == Some(GrantStatus::Revoked) {
            return GrantStatus::Revoked;
        }
        if self.end < today {
            return GrantStatus::Expired;
        }
        match self.reported_status {
            Some(status) => status,
            None if self.start > today => GrantStatus::Pending,
            None => GrantStatus::Active,
        }
    }

    /// Days until the end date; negative once the grant has ended.
    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        (self.end - today).num_days()
    }

    pub fn has_ended(&self, today: NaiveDate) -> bool {
        self.end < today
    }

    /// Storage awarded across the grant's storage allocations.
    pub fn storage_award_bytes(&self) -> u64 {
        self.allocations
            .iter()
            .filter(|a| a.is_storage())
            .filter_map(|a| a.parameters.get("capacity"))
            .map(|gb| (gb.max(0.0) * BYTES_PER_GB as f64) as u64)
            .sum()
    }

    pub fn compute_hours_awarded(&self) -> f64 {
        self.allocations
            .iter()
            .filter_map(|a| a.parameters.get("hours"))
            .sum()
    }

    pub fn compute_hours_used(&self) -> f64 {
        self.allocations
            .iter()
            .flat_map(|a| a.consumed.values())
            .sum()
    }

    pub fn funds(&self, project: &str) -> bool {
        self.projects.iter().any(|p| p == project)
    }

    /// Parses one raw backend record, failing on missing or mistyped fields.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let record: GrantRecord =
            serde_json::from_value(value.clone()).map_err(|err| err.to_string())?;
        record.into_grant()
    }
}

#[derive(Debug, Deserialize)]
struct GrantRecord {
    name: String,
    #[serde(default, alias = "leader")]
    pi: Option<String>,
    #[serde(default)]
    status: Option<String>,
    start: String,
    end: String,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    projects: Vec<String>,
    #[serde(default)]
    group_members: Vec<String>,
    #[serde(default)]
    allocations: Vec<AllocationRecord>,
    #[serde(default)]
    allocations_usages: Vec<AllocationUsageRecord>,
}

#[derive(Debug, Deserialize)]
struct AllocationRecord {
    name: String,
    resource: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AllocationUsageRecord {
    name: String,
    #[serde(default)]
    summary: UsageSummaryRecord,
}

#[derive(Debug, Default, Deserialize)]
struct UsageSummaryRecord {
    #[serde(default)]
    resources: BTreeMap<String, Value>,
}

impl GrantRecord {
    fn into_grant(self) -> Result<Grant, String> {
        if self.name.trim().is_empty() {
            return Err("grant name is empty".into());
        }
        let start = parse_date(&self.start).ok_or_else(|| format!("invalid start date '{}'", self.start))?;
        let end = parse_date(&self.end).ok_or_else(|| format!("invalid end date '{}'", self.end))?;
        if end < start {
            return Err(format!("end date {end} precedes start date {start}"));
        }

        let projects: BTreeSet<String> = self
            .group
            .into_iter()
            .chain(self.projects)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let mut consumed: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for usage in self.allocations_usages {
            consumed.insert(usage.name, numeric_map(usage.summary.resources)?);
        }

        let mut allocations = Vec::with_capacity(self.allocations.len());
        for alloc in self.allocations {
            let parameters = numeric_map(alloc.parameters)
                .map_err(|err| format!("allocation {}: {err}", alloc.name))?;
            allocations.push(Allocation {
                consumed: consumed.remove(&alloc.name).unwrap_or_default(),
                name: alloc.name,
                resource: alloc.resource,
                status: alloc.status,
                start: alloc.start,
                end: alloc.end,
                parameters,
            });
        }

        let mut members = self.group_members;
        members.sort();

        Ok(Grant {
            id: self.name,
            pi: self.pi.filter(|p| !p.trim().is_empty()),
            start,
            end,
            reported_status: self.status.as_deref().and_then(GrantStatus::from_backend),
            status_label: self.status.filter(|s| !s.trim().is_empty()),
            projects: projects.into_iter().collect(),
            members,
            allocations,
        })
    }
}

fn numeric_map(raw: BTreeMap<String, Value>) -> Result<BTreeMap<String, f64>, String> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        match value {
            Value::Number(n) => {
                let number = n.as_f64().ok_or_else(|| format!("parameter {key} is not finite"))?;
                out.insert(key, number);
            }
            Value::Null => {}
            other => return Err(format!("parameter {key} is not numeric: {other}")),
        }
    }
    Ok(out)
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}
