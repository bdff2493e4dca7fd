use chrono::{DateTime, TimeZone, Utc};
use hpc_grants::config::ReconcileSettings;
use hpc_grants::events::{EventLog, EVENTS_FILE_NAME};
use hpc_grants::registry::{AccountingBackend, GrantRegistryClient};
use hpc_grants::storage::{StorageBackend, StorageUsageClient};
use hpc_grants::ReconciliationEngine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct IntegrationHarness {
    workspace: TempDir,
}

impl IntegrationHarness {
    pub fn new() -> Self {
        let workspace = TempDir::new().expect("failed to create temp workspace");
        Self { workspace }
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn event_log(&self) -> EventLog {
        EventLog::at(self.workspace.path().join(EVENTS_FILE_NAME))
    }

    /// Engine over fake backends, logging into the temp workspace.
    pub fn engine(
        &self,
        accounting: Arc<dyn AccountingBackend>,
        storage: Arc<dyn StorageBackend>,
        timeout: Duration,
        max_parallel_fetches: u32,
    ) -> ReconciliationEngine {
        ReconciliationEngine::new(
            GrantRegistryClient::new(accounting),
            StorageUsageClient::new(storage, timeout),
            ReconcileSettings {
                max_parallel_fetches,
                reverse_lookup: true,
            },
        )
        .with_event_log(self.event_log())
    }
}

/// Fixed reconciliation instant used across scenarios.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
}

mod bursar_http;
mod storage_http;
pub mod support;
