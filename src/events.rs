//! Run log for reconciliations, stored as JSONL next to the config.

use crate::config::workspace_root;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const EVENTS_FILE_NAME: &str = "events.jsonl";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ReconciliationStarted,
    GrantFetchFailed,
    GroupNotListed,
    EnumerationFailed,
    UsageFetchFailed,
    ReconciliationCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub event_id: Uuid,
    /// Shared by every event of one reconciliation.
    pub run_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// Append-only event file.
#[derive(Debug, Clone)]
pub struct EventLog {
    events_path: PathBuf,
}

impl EventLog {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            events_path: path.into(),
        }
    }

    /// Log file inside the workspace root.
    pub fn in_workspace() -> Result<Self> {
        Ok(Self::at(workspace_root()?.join(EVENTS_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.events_path
    }

    pub fn append(&self, run_id: Uuid, event_type: EventType, details: serde_json::Value) -> Result<()> {
        let event = RunEvent {
            event_id: Uuid::new_v4(),
            run_id,
            event_type,
            timestamp: Utc::now(),
            details,
        };
        if let Some(parent) = self.events_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)?;
        file.write_all(serde_json::to_string(&event)?.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    pub fn load_events(&self) -> Result<Vec<RunEvent>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.events_path)?;
        let mut events = Vec::new();
        for line in data.lines().filter(|l| !l.trim().is_empty()) {
            let event: RunEvent = serde_json::from_str(line)?;
            events.push(event);
        }
        Ok(events)
    }

    pub fn load_run(&self, run_id: Uuid) -> Result<Vec<RunEvent>> {
        Ok(self
            .load_events()?
            .into_iter()
            .filter(|event| event.run_id == run_id)
            .collect())
    }
}
