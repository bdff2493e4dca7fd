pub mod grant;
pub mod usage;

pub use grant::{parse_date, Allocation, Grant, GrantStatus, BYTES_PER_GB};
pub use usage::{ProjectUsage, UsageOutcome};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which grants (and therefore which projects) a report covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scope {
    All,
    /// Grants whose principal investigator matches the name.
    Pi(String),
    /// Grants visible to a cluster user (the Bursar user endpoint).
    User(String),
    /// Grants funding one project, plus the project itself.
    Project(String),
}

impl Scope {
    /// Retains the grants this scope selects from a broader listing.
    pub fn admits(&self, grant: &Grant) -> bool {
        match self {
            Scope::All | Scope::User(_) => true,
            Scope::Pi(name) => grant
                .pi
                .as_deref()
                .map(|pi| pi.eq_ignore_ascii_case(name))
                .unwrap_or(false),
            Scope::Project(project) => grant.funds(project),
        }
    }

    /// Project explicitly named by the caller, if any.
    pub fn named_project(&self) -> Option<&str> {
        match self {
            Scope::Project(project) => Some(project),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => write!(f, "all"),
            Scope::Pi(name) => write!(f, "pi:{name}"),
            Scope::User(user) => write!(f, "user:{user}"),
            Scope::Project(project) => write!(f, "project:{project}"),
        }
    }
}
