use super::{StorageBackend, StorageError};
use crate::models::ProjectUsage;
use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Quota service speaking JSON over HTTP.
pub struct HttpQuotaBackend {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    quota_bytes: Option<u64>,
    used_bytes: u64,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProjectEntry {
    Name(String),
    Object { project: String },
}

impl HttpQuotaBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder().build()?,
        })
    }

    fn unavailable(err: reqwest::Error) -> StorageError {
        StorageError::BackendUnavailable(err.to_string())
    }
}

impl StorageBackend for HttpQuotaBackend {
    fn project_usage(&self, project: &str, timeout: Duration) -> Result<ProjectUsage, StorageError> {
        let url = format!("{}/projects/{}", self.base_url, project);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    StorageError::Timeout {
                        project: project.to_string(),
                        after_ms: timeout.as_millis() as u64,
                    }
                } else {
                    Self::unavailable(err)
                }
            })?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(StorageError::UnknownProject(project.to_string())),
            status => {
                return Err(StorageError::BackendUnavailable(format!("{url} returned {status}")));
            }
        }
        let body: UsageBody = response.json().map_err(|err| StorageError::Unparseable {
            project: project.to_string(),
            reason: err.to_string(),
        })?;
        if let Some(reported) = body.project.as_deref() {
            if reported != project {
                return Err(StorageError::Unparseable {
                    project: project.to_string(),
                    reason: format!("backend answered for {reported}"),
                });
            }
        }
        Ok(ProjectUsage {
            project: project.to_string(),
            quota_bytes: body.quota_bytes,
            used_bytes: body.used_bytes,
            updated_at: body.updated_at.unwrap_or_else(Utc::now),
        })
    }

    fn enumerate_projects(&self, timeout: Duration) -> Result<Option<Vec<String>>, StorageError> {
        let url = format!("{}/projects", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .map_err(Self::unavailable)?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
                return Ok(None);
            }
            status => {
                return Err(StorageError::BackendUnavailable(format!("{url} returned {status}")));
            }
        }
        let entries: Vec<ProjectEntry> = response
            .json()
            .map_err(|err| StorageError::BackendUnavailable(format!("unparseable project list: {err}")))?;
        let mut projects: Vec<String> = entries
            .into_iter()
            .map(|entry| match entry {
                ProjectEntry::Name(name) => name,
                ProjectEntry::Object { project } => project,
            })
            .collect();
        projects.sort();
        projects.dedup();
        Ok(Some(projects))
    }
}
