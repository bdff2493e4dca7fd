pub mod config;
pub mod events;
pub mod models;
pub mod reconcile;
pub mod registry;
pub mod reports;
pub mod storage;

// Re-export commonly used types for convenience.
pub use config::AppConfig;
pub use models::{Grant, GrantStatus, ProjectUsage, Scope, UsageOutcome};
pub use reconcile::{ReconcileError, ReconciliationEngine};
pub use registry::{GrantRegistryClient, RegistryError};
pub use reports::{Flag, ReconciledRecord, ReportModel};
pub use storage::{StorageError, StorageUsageClient};
