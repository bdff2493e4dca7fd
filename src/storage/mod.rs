//! Storage usage lookups.
//!
//! Usage is volatile, so nothing here is cached: every call goes to the
//! backend. [`StorageUsageClient`] bounds each call with its own deadline so
//! a hung backend only costs the caller the configured timeout.

pub mod http;
pub mod lustre;

pub use http::HttpQuotaBackend;
pub use lustre::LustreBackend;

use crate::config::{AppConfig, StorageBackendKind};
use crate::models::ProjectUsage;
use anyhow::{Context, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("unknown project {0}")]
    UnknownProject(String),
    #[error("usage lookup for {project} timed out after {after_ms} ms")]
    Timeout { project: String, after_ms: u64 },
    #[error("unparseable usage for {project}: {reason}")]
    Unparseable { project: String, reason: String },
}

pub trait StorageBackend: Send + Sync {
    /// Current usage of one project.
    ///
    /// Implementations must give up once `timeout` has elapsed. The client
    /// stops waiting at the same deadline but cannot cancel the call, so a
    /// backend that overruns keeps a lookup in flight beyond the pool bound.
    fn project_usage(&self, project: &str, timeout: Duration) -> Result<ProjectUsage, StorageError>;

    /// Lists every project the backend knows about; `Ok(None)` when the
    /// backend cannot enumerate.
    fn enumerate_projects(&self, _timeout: Duration) -> Result<Option<Vec<String>>, StorageError> {
        Ok(None)
    }
}

pub struct StorageUsageClient {
    backend: Arc<dyn StorageBackend>,
    timeout: Duration,
}

impl StorageUsageClient {
    pub fn new(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Builds the backend selected in `[storage]`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = &config.storage;
        let backend: Arc<dyn StorageBackend> = match settings.backend {
            StorageBackendKind::Lustre => Arc::new(LustreBackend::new(settings)),
            StorageBackendKind::Http => {
                let url = settings
                    .url
                    .as_deref()
                    .context("storage.backend = \"http\" requires storage.url")?;
                Arc::new(HttpQuotaBackend::new(url)?)
            }
        };
        Ok(Self::new(backend, Duration::from_millis(settings.timeout_ms)))
    }

    pub fn fetch(&self, project: &str) -> Result<ProjectUsage, StorageError> {
        let (tx, rx) = mpsc::channel();
        let backend = Arc::clone(&self.backend);
        let owned = project.to_string();
        let timeout = self.timeout;
        thread::Builder::new()
            .name("usage-lookup".into())
            .spawn(move || {
                let _ = tx.send(backend.project_usage(&owned, timeout));
            })
            .map_err(|err| StorageError::BackendUnavailable(format!("cannot start lookup: {err}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(StorageError::Timeout {
                project: project.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(StorageError::BackendUnavailable(format!(
                "lookup for {project} aborted"
            ))),
        }
    }

    pub fn enumerate_projects(&self) -> Result<Option<Vec<String>>, StorageError> {
        self.backend.enumerate_projects(self.timeout)
    }
}
