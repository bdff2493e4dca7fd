//! Grant registry: read-only access to grant records held by the
//! accounting backend.
//!
//! [`GrantRegistryClient`] turns raw backend payloads into typed [`Grant`]s
//! and fails fast on any record it cannot parse. The admin listing also
//! names every group, including groups no grant funds. Repeated lookups within one
//! reconciliation go through a [`RegistrySession`], whose cache is keyed by
//! the backend query and disappears with the session.

pub mod bursar;
pub mod credential;

pub use bursar::BursarBackend;
pub use credential::Credential;

use crate::models::{Grant, Scope};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("accounting backend unavailable at {endpoint}: {reason}")]
    BackendUnavailable { endpoint: String, reason: String },
    #[error("unauthorized request to {endpoint}")]
    Unauthorized { endpoint: String },
    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
    #[error("malformed grant record ({reason}): {record}")]
    MalformedRecord { record: String, reason: String },
    #[error("unable to obtain credential: {0}")]
    Credential(String),
    #[error("invalid registry configuration: {0}")]
    Configuration(String),
}

/// A request the accounting backend understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendQuery {
    /// Every grant with its group (admin listing).
    AllGrants,
    /// Grants visible to one cluster user.
    UserGrants(String),
}

impl BackendQuery {
    pub fn for_scope(scope: &Scope) -> Self {
        match scope {
            Scope::User(user) => BackendQuery::UserGrants(user.clone()),
            Scope::All | Scope::Pi(_) | Scope::Project(_) => BackendQuery::AllGrants,
        }
    }

    /// Service name the credential is minted for.
    pub fn service(&self) -> &'static str {
        match self {
            BackendQuery::AllGrants => "admin/grants_group_info",
            BackendQuery::UserGrants(_) => "user/grants_info",
        }
    }
}

/// Grants returned by one backend query, with the group listing when the
/// endpoint provides one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrantListing {
    pub grants: Vec<Grant>,
    /// Group names from the admin listing, sorted; `None` for endpoints
    /// without a `groups` list.
    pub groups: Option<Vec<String>>,
}

/// Source of raw grant payloads.
pub trait AccountingBackend: Send + Sync {
    fn query(&self, query: &BackendQuery) -> Result<Value, RegistryError>;
}

pub struct GrantRegistryClient {
    backend: Arc<dyn AccountingBackend>,
}

impl GrantRegistryClient {
    pub fn new(backend: Arc<dyn AccountingBackend>) -> Self {
        Self { backend }
    }

    /// Opens a cache scoped to one top-level call.
    pub fn session(&self) -> RegistrySession<'_> {
        RegistrySession {
            client: self,
            cache: HashMap::new(),
            backend_calls: 0,
        }
    }

    /// One-shot fetch without a shared cache.
    pub fn fetch(&self, scope: &Scope) -> Result<Vec<Grant>, RegistryError> {
        self.session().fetch(scope)
    }

    fn load(&self, query: &BackendQuery) -> Result<GrantListing, RegistryError> {
        let payload = self.backend.query(query)?;
        let records = grant_records(&payload).ok_or_else(|| RegistryError::InvalidResponse {
            endpoint: query.service().to_string(),
            reason: "expected a list of grants or an object with a `grants` list".into(),
        })?;
        let mut grants = Vec::with_capacity(records.len());
        for raw in records {
            let grant = Grant::from_value(raw).map_err(|reason| RegistryError::MalformedRecord {
                record: raw.to_string(),
                reason,
            })?;
            grants.push(grant);
        }
        grants.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| a.id.cmp(&b.id)));
        Ok(GrantListing {
            grants,
            groups: group_names(&payload)?,
        })
    }
}

fn grant_records(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get("grants").and_then(Value::as_array),
        _ => None,
    }
}

fn group_names(payload: &Value) -> Result<Option<Vec<String>>, RegistryError> {
    let Some(groups) = payload.get("groups").and_then(Value::as_array) else {
        return Ok(None);
    };
    let mut names = BTreeSet::new();
    for raw in groups {
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| raw.as_str())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RegistryError::MalformedRecord {
                record: raw.to_string(),
                reason: "group without a name".into(),
            })?;
        names.insert(name.to_string());
    }
    Ok(Some(names.into_iter().collect()))
}

/// Grant lookups for the duration of one reconciliation.
pub struct RegistrySession<'a> {
    client: &'a GrantRegistryClient,
    cache: HashMap<BackendQuery, Arc<GrantListing>>,
    backend_calls: usize,
}

impl<'a> RegistrySession<'a> {
    pub fn fetch(&mut self, scope: &Scope) -> Result<Vec<Grant>, RegistryError> {
        Ok(self.listing(scope)?.grants)
    }

    /// Grants admitted by `scope`, plus the unfiltered group listing.
    pub fn listing(&mut self, scope: &Scope) -> Result<GrantListing, RegistryError> {
        let query = BackendQuery::for_scope(scope);
        let listing = match self.cache.get(&query) {
            Some(cached) => Arc::clone(cached),
            None => {
                self.backend_calls += 1;
                let loaded = Arc::new(self.client.load(&query)?);
                self.cache.insert(query, Arc::clone(&loaded));
                loaded
            }
        };
        Ok(GrantListing {
            grants: listing
                .grants
                .iter()
                .filter(|g| scope.admits(g))
                .cloned()
                .collect(),
            groups: listing.groups.clone(),
        })
    }

    /// Number of round-trips this session made to the backend.
    pub fn backend_calls(&self) -> usize {
        self.backend_calls
    }
}
