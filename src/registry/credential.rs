use super::RegistryError;
use crate::config::{AuthMethod, AuthSettings};
use std::io::Write;
use std::process::{Command, Stdio};

/// Produces the `x-auth-hpcbursar` header value for a `user:service` pair.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Encode the pair with the local MUNGE daemon.
    Munge { binary: String },
    Static(String),
    None,
}

impl Credential {
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, RegistryError> {
        match settings.method {
            AuthMethod::Munge => Ok(Credential::Munge {
                binary: settings.munge_binary.clone(),
            }),
            AuthMethod::Static => settings
                .static_token
                .clone()
                .map(Credential::Static)
                .ok_or_else(|| {
                    RegistryError::Configuration("auth.method = \"static\" needs auth.static_token".into())
                }),
            AuthMethod::None => Ok(Credential::None),
        }
    }

    pub fn header_value(&self, user: &str, service: &str) -> Result<Option<String>, RegistryError> {
        match self {
            Credential::Munge { binary } => munge_encode(binary, &format!("{user}:{service}")).map(Some),
            Credential::Static(token) => Ok(Some(token.clone())),
            Credential::None => Ok(None),
        }
    }
}

fn munge_encode(binary: &str, payload: &str) -> Result<String, RegistryError> {
    let mut child = Command::new(binary)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| RegistryError::Credential(format!("failed to run {binary}: {err}")))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(payload.as_bytes())
            .map_err(|err| RegistryError::Credential(format!("failed to write to {binary}: {err}")))?;
    }
    let output = child
        .wait_with_output()
        .map_err(|err| RegistryError::Credential(format!("{binary} did not finish: {err}")))?;
    if !output.status.success() {
        return Err(RegistryError::Credential(format!(
            "{binary} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(RegistryError::Credential(format!("{binary} produced an empty credential")));
    }
    Ok(token)
}
