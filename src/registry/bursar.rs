use super::{AccountingBackend, BackendQuery, Credential, RegistryError};
use crate::config::{AppConfig, AuthSettings, BursarSettings};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::fs;
use std::time::Duration;

/// Header the Bursar expects the MUNGE credential in.
pub const AUTH_HEADER: &str = "x-auth-hpcbursar";

/// HPC Bursar REST client.
pub struct BursarBackend {
    base_url: String,
    user: String,
    credential: Credential,
    client: Client,
}

impl BursarBackend {
    pub fn new(bursar: &BursarSettings, auth: &AuthSettings) -> Result<Self, RegistryError> {
        let mut builder = Client::builder().timeout(Duration::from_millis(bursar.timeout_ms));
        if let Some(cert_path) = &bursar.cert_path {
            let pem = fs::read(cert_path).map_err(|err| {
                RegistryError::Configuration(format!("cannot read {}: {err}", cert_path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|err| {
                RegistryError::Configuration(format!("invalid certificate {}: {err}", cert_path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|err| RegistryError::Configuration(format!("http client: {err}")))?;
        let mut base_url = bursar.url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            base_url,
            user: bursar.user.clone(),
            credential: Credential::from_settings(auth)?,
            client,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        Self::new(&config.bursar, &config.auth)
    }

    pub fn endpoint(&self, query: &BackendQuery) -> String {
        match query {
            BackendQuery::AllGrants => format!("{}{}/", self.base_url, query.service()),
            BackendQuery::UserGrants(user) => format!("{}{}/{}", self.base_url, query.service(), user),
        }
    }
}

impl AccountingBackend for BursarBackend {
    fn query(&self, query: &BackendQuery) -> Result<Value, RegistryError> {
        let endpoint = self.endpoint(query);
        let mut request = self.client.get(&endpoint);
        if let Some(token) = self.credential.header_value(&self.user, query.service())? {
            request = request.header(AUTH_HEADER, token);
        }
        let response = request.send().map_err(|err| RegistryError::BackendUnavailable {
            endpoint: endpoint.clone(),
            reason: if err.is_timeout() {
                "request timed out".into()
            } else {
                err.to_string()
            },
        })?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(RegistryError::Unauthorized { endpoint });
            }
            status => {
                return Err(RegistryError::InvalidResponse {
                    endpoint,
                    reason: format!("unexpected status {status}"),
                });
            }
        }
        response.json::<Value>().map_err(|err| RegistryError::InvalidResponse {
            endpoint,
            reason: format!("unable to parse body: {err}"),
        })
    }
}
