use super::{StorageBackend, StorageError};
use crate::config::StorageSettings;
use crate::models::ProjectUsage;
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Lustre project quotas read through `lfs quota -p <gid>`.
///
/// Projects are unix groups: the group id doubles as the Lustre project id
/// and each project owns a directory under `project_base`. Groups resolve
/// through NSS unless a group file is configured.
pub struct LustreBackend {
    lfs_path: PathBuf,
    filesystem: String,
    project_base: PathBuf,
    group_file: Option<PathBuf>,
}

impl LustreBackend {
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            lfs_path: settings.lfs_path.clone(),
            filesystem: settings.filesystem.clone(),
            project_base: settings.project_base.clone(),
            group_file: settings.group_file.clone(),
        }
    }

    fn group_table(&self) -> Result<Option<HashMap<String, u32>>, StorageError> {
        let Some(path) = &self.group_file else {
            return Ok(None);
        };
        let data = fs::read_to_string(path).map_err(|err| {
            StorageError::BackendUnavailable(format!("cannot read {}: {err}", path.display()))
        })?;
        Ok(Some(parse_group_file(&data)))
    }

    fn gid_of(
        &self,
        table: Option<&HashMap<String, u32>>,
        project: &str,
    ) -> Result<Option<u32>, StorageError> {
        match table {
            Some(table) => Ok(table.get(project).copied()),
            None => nss_gid(project),
        }
    }

    fn run_quota(&self, project: &str, gid: u32, timeout: Duration) -> Result<String, StorageError> {
        let mut child = Command::new(&self.lfs_path)
            .args(["quota", "-p", &gid.to_string(), &self.filesystem])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                StorageError::BackendUnavailable(format!("failed to run {}: {err}", self.lfs_path.display()))
            })?;

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(StorageError::Timeout {
                        project: project.to_string(),
                        after_ms: timeout.as_millis() as u64,
                    });
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(err) => return Err(StorageError::BackendUnavailable(err.to_string())),
            }
        };

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)
                .map_err(|err| StorageError::BackendUnavailable(err.to_string()))?;
        }
        if !status.success() {
            return Err(StorageError::BackendUnavailable(format!(
                "lfs quota exited with {status} for {project}"
            )));
        }
        Ok(stdout)
    }
}

impl StorageBackend for LustreBackend {
    fn project_usage(&self, project: &str, timeout: Duration) -> Result<ProjectUsage, StorageError> {
        let table = self.group_table()?;
        let gid = self
            .gid_of(table.as_ref(), project)?
            .ok_or_else(|| StorageError::UnknownProject(project.to_string()))?;
        let stdout = self.run_quota(project, gid, timeout)?;
        let (used_kb, limit_kb) =
            parse_lfs_quota(&stdout, &self.filesystem).ok_or_else(|| StorageError::Unparseable {
                project: project.to_string(),
                reason: format!("no quota line for {}", self.filesystem),
            })?;
        Ok(ProjectUsage {
            project: project.to_string(),
            quota_bytes: (limit_kb > 0).then(|| limit_kb * 1024),
            used_bytes: used_kb * 1024,
            updated_at: Utc::now(),
        })
    }

    fn enumerate_projects(&self, _timeout: Duration) -> Result<Option<Vec<String>>, StorageError> {
        if !self.project_base.is_dir() {
            return Ok(None);
        }
        let table = self.group_table()?;
        let mut projects = Vec::new();
        for entry in WalkDir::new(&self.project_base)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if self.gid_of(table.as_ref(), name)?.is_some() {
                projects.push(name.to_string());
            }
        }
        projects.sort();
        Ok(Some(projects))
    }
}

/// Looks a group up through the system name service (files, LDAP, SSSD).
#[cfg(unix)]
fn nss_gid(name: &str) -> Result<Option<u32>, StorageError> {
    if name.contains('\0') {
        return Ok(None);
    }
    nix::unistd::Group::from_name(name)
        .map(|group| group.map(|g| g.gid.as_raw()))
        .map_err(|err| StorageError::BackendUnavailable(format!("group lookup for {name}: {err}")))
}

#[cfg(not(unix))]
fn nss_gid(_name: &str) -> Result<Option<u32>, StorageError> {
    Err(StorageError::BackendUnavailable(
        "no system group database on this platform; set storage.group_file".into(),
    ))
}

/// Parses `/etc/group` style lines into name → gid.
pub fn parse_group_file(data: &str) -> HashMap<String, u32> {
    data.lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let _password = fields.next()?;
            let gid = fields.next()?.trim().parse().ok()?;
            Some((name.to_string(), gid))
        })
        .collect()
}

/// Extracts `(used_kb, hard_limit_kb)` for `filesystem` from `lfs quota`
/// output. Long mount points make `lfs` wrap the figures onto the next line.
pub fn parse_lfs_quota(output: &str, filesystem: &str) -> Option<(u64, u64)> {
    let wanted = filesystem.trim_end_matches('/');
    let mut lines = output.lines();
    while let Some(line) = lines.next() {
        let mut tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first() {
            Some(first) if first.trim_end_matches('/') == wanted => {}
            _ => continue,
        }
        tokens.remove(0);
        if tokens.is_empty() {
            tokens = lines.next()?.split_whitespace().collect();
        }
        let used = parse_kb(tokens.first()?)?;
        let limit = parse_kb(tokens.get(2)?)?;
        return Some((used, limit));
    }
    None
}

fn parse_kb(token: &str) -> Option<u64> {
    token.trim_end_matches('*').parse().ok()
}
