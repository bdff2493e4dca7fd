//! Configuration primitives for hpc-grants.
//!
//! Stored in a machine-readable TOML file located at:
//!   $HPC_GRANTS_HOME/config/config.toml when the variable is set
//!   $XDG_CONFIG_HOME/hpc-grants/config/config.toml on Linux otherwise
//!
//! The process environment is consulted only here. Everything downstream
//! (registry client, storage client, engine) receives the resolved
//! [`AppConfig`] through its constructor.

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Standard relative path to the config file (resolved per OS at runtime).
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable overriding the workspace root.
pub const HOME_ENV: &str = "HPC_GRANTS_HOME";

/// Root configuration for one installation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Accounting backend (HPC Bursar) connection.
    #[serde(default)]
    pub bursar: BursarSettings,
    /// Credential used for the `x-auth-hpcbursar` header.
    #[serde(default)]
    pub auth: AuthSettings,
    /// Storage/quota backend selection and limits.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Fan-out knobs for the reconciliation engine.
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BursarSettings {
    /// Base API url, including the trailing `api/v1/`.
    #[serde(default = "default_bursar_url")]
    pub url: String,
    /// CA bundle used to verify the Bursar certificate.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// User the credential is minted for and the user scope defaults to.
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_bursar_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BursarSettings {
    fn default() -> Self {
        Self {
            url: default_bursar_url(),
            cert_path: None,
            user: default_user(),
            timeout_ms: default_bursar_timeout_ms(),
        }
    }
}

fn default_bursar_url() -> String {
    "http://127.0.0.1:8000/api/v1/".into()
}

fn default_user() -> String {
    "root".into()
}

const fn default_bursar_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Munge,
    Static,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_auth_method")]
    pub method: AuthMethod,
    #[serde(default = "default_munge_binary")]
    pub munge_binary: String,
    /// Token sent verbatim when `method = "static"`.
    #[serde(default)]
    pub static_token: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            method: default_auth_method(),
            munge_binary: default_munge_binary(),
            static_token: None,
        }
    }
}

const fn default_auth_method() -> AuthMethod {
    AuthMethod::Munge
}

fn default_munge_binary() -> String {
    "munge".into()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Lustre,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackendKind,
    /// Upper bound for a single project usage lookup.
    #[serde(default = "default_storage_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_lfs_path")]
    pub lfs_path: PathBuf,
    /// Mount point passed to `lfs quota`.
    #[serde(default = "default_filesystem")]
    pub filesystem: String,
    /// Directory holding one subdirectory per project group.
    #[serde(default = "default_project_base")]
    pub project_base: PathBuf,
    /// Group database in `/etc/group` format. Unset means project gids are
    /// resolved through NSS, which also covers LDAP/SSSD groups.
    #[serde(default)]
    pub group_file: Option<PathBuf>,
    /// Quota service url, only used with `backend = "http"`.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            timeout_ms: default_storage_timeout_ms(),
            lfs_path: default_lfs_path(),
            filesystem: default_filesystem(),
            project_base: default_project_base(),
            group_file: None,
            url: None,
        }
    }
}

const fn default_storage_backend() -> StorageBackendKind {
    StorageBackendKind::Lustre
}

const fn default_storage_timeout_ms() -> u64 {
    5_000
}

fn default_lfs_path() -> PathBuf {
    PathBuf::from("/usr/bin/lfs")
}

fn default_filesystem() -> String {
    "/net/pr2/".into()
}

fn default_project_base() -> PathBuf {
    PathBuf::from("/net/pr2/projects/plgrid/")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Maximum number of usage lookups in flight at once.
    #[serde(default = "default_max_parallel_fetches")]
    pub max_parallel_fetches: u32,
    /// Enumerate storage projects to detect ones without any grant.
    #[serde(default = "default_reverse_lookup")]
    pub reverse_lookup: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            max_parallel_fetches: default_max_parallel_fetches(),
            reverse_lookup: default_reverse_lookup(),
        }
    }
}

const fn default_max_parallel_fetches() -> u32 {
    8
}

const fn default_reverse_lookup() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Append run events to `events.jsonl` in the workspace root.
    #[serde(default = "default_events_enabled")]
    pub events_enabled: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            events_enabled: default_events_enabled(),
        }
    }
}

const fn default_events_enabled() -> bool {
    true
}

/// Returns the root directory where hpc-grants keeps its config and logs.
///
/// Order of precedence:
/// 1. `HPC_GRANTS_HOME` environment variable.
/// 2. OS-specific config directory via `directories::BaseDirs`.
pub fn workspace_root() -> Result<PathBuf> {
    if let Ok(path) = env::var(HOME_ENV) {
        return Ok(PathBuf::from(path));
    }
    let base_dirs = BaseDirs::new().context("Unable to determine OS config directory")?;
    Ok(base_dirs.config_dir().join("hpc-grants"))
}

pub fn config_dir() -> Result<PathBuf> {
    Ok(workspace_root()?.join("config"))
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads the configuration from the default location or returns defaults,
/// then applies environment overrides.
pub fn load_or_default() -> Result<AppConfig> {
    let path = config_file_path()?;
    load_from(&path)
}

/// Loads the configuration from an explicit path (defaults if missing),
/// then applies environment overrides.
pub fn load_from(path: &Path) -> Result<AppConfig> {
    let mut cfg = if path.exists() {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&data).with_context(|| format!("Failed to parse config file {:?}", path))?
    } else {
        AppConfig::default()
    };
    apply_env_overrides(&mut cfg, |key| env::var(key).ok());
    Ok(cfg)
}

/// Applies the variables the cluster bootstrap exports for its tools.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("HPC_BURSAR_URL").filter(|v| !v.is_empty()) {
        config.bursar.url = url;
    }
    if let Some(cert) = lookup("HPC_BURSAR_CERT_PATH").filter(|v| !v.is_empty()) {
        config.bursar.cert_path = Some(PathBuf::from(cert));
    }
    if let Some(user) = lookup("USER").filter(|v| !v.is_empty()) {
        config.bursar.user = user;
    }
}
