use chrono::Utc;
use hpc_grants::registry::{AccountingBackend, BackendQuery, RegistryError};
use hpc_grants::storage::{StorageBackend, StorageError};
use hpc_grants::ProjectUsage;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Accounting backend answering every query with one canned payload.
pub struct FakeAccounting {
    response: Result<Value, fn() -> RegistryError>,
    pub calls: AtomicUsize,
}

impl FakeAccounting {
    pub fn with_grants(grants: Vec<Value>) -> Self {
        Self {
            response: Ok(json!({ "grants": grants })),
            calls: AtomicUsize::new(0),
        }
    }

    /// Admin listing shape: named groups next to the grants.
    pub fn with_groups(groups: &[&str], grants: Vec<Value>) -> Self {
        let groups: Vec<Value> = groups.iter().map(|name| json!({ "name": name })).collect();
        Self {
            response: Ok(json!({ "groups": groups, "grants": grants })),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(make: fn() -> RegistryError) -> Self {
        Self {
            response: Err(make),
            calls: AtomicUsize::new(0),
        }
    }
}

impl AccountingBackend for FakeAccounting {
    fn query(&self, _query: &BackendQuery) -> Result<Value, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Ok(value) => Ok(value.clone()),
            Err(make) => Err(make()),
        }
    }
}

pub fn grant(name: &str, project: &str, status: &str, end: &str) -> Value {
    json!({
        "name": name,
        "pi": "Dr. Nowak",
        "status": status,
        "start": "2025-01-01",
        "end": end,
        "group": project,
        "group_members": ["plgamy"],
        "allocations": [
            {"name": format!("{name}-storage"), "resource": "storage",
             "parameters": {"capacity": 1}}
        ]
    })
}

#[derive(Clone)]
pub enum FakeUsage {
    Usage { quota: u64, used: u64, delay: Duration },
    Fail(StorageError),
    Hang,
}

impl FakeUsage {
    pub fn usage(quota: u64, used: u64) -> Self {
        FakeUsage::Usage {
            quota,
            used,
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(quota: u64, used: u64, delay_ms: u64) -> Self {
        FakeUsage::Usage {
            quota,
            used,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

/// Storage backend with scripted per-project behaviour.
pub struct FakeStorage {
    projects: HashMap<String, FakeUsage>,
    enumeration: Option<Result<Vec<String>, StorageError>>,
    pub completed: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    /// Most lookups observed running at the same time.
    pub peak_in_flight: AtomicUsize,
}

impl FakeStorage {
    pub fn new(projects: Vec<(&str, FakeUsage)>) -> Self {
        Self {
            projects: projects
                .into_iter()
                .map(|(name, usage)| (name.to_string(), usage))
                .collect(),
            enumeration: None,
            completed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_enumeration(mut self, result: Result<Vec<String>, StorageError>) -> Self {
        self.enumeration = Some(result);
        self
    }
}

impl StorageBackend for FakeStorage {
    fn project_usage(&self, project: &str, _timeout: Duration) -> Result<ProjectUsage, StorageError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = match self.projects.get(project) {
            None => Err(StorageError::UnknownProject(project.to_string())),
            Some(FakeUsage::Fail(err)) => Err(err.clone()),
            Some(FakeUsage::Hang) => {
                thread::sleep(Duration::from_secs(5));
                Err(StorageError::BackendUnavailable("hung".into()))
            }
            Some(FakeUsage::Usage { quota, used, delay }) => {
                thread::sleep(*delay);
                Ok(ProjectUsage {
                    project: project.to_string(),
                    quota_bytes: Some(*quota),
                    used_bytes: *used,
                    updated_at: Utc::now(),
                })
            }
        };
        self.completed.lock().unwrap().push(project.to_string());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn enumerate_projects(&self, _timeout: Duration) -> Result<Option<Vec<String>>, StorageError> {
        match &self.enumeration {
            None => Ok(None),
            Some(result) => result.clone().map(Some),
        }
    }
}
