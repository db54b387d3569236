//! Transport to the local Percy CLI server.
//!
//! [`ServiceClient`] is the seam the rest of the SDK talks to; the default
//! [`HttpServiceClient`] is a blocking `reqwest` client, and tests swap in
//! recording fakes.

use std::fmt;

use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::config::PercyConfig;

/// Response header carrying the CLI's version.
pub const VERSION_HEADER: &str = "x-percy-core-version";

pub const HEALTHCHECK_PATH: &str = "/percy/healthcheck";
pub const DOM_SCRIPT_PATH: &str = "/percy/dom.js";
pub const SNAPSHOT_PATH: &str = "/percy/snapshot";
pub const AUTOMATE_SCREENSHOT_PATH: &str = "/percy/automateScreenshot";

/// Raw response returned by a [`ServiceClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    pub version: Option<String>,
    pub body: String,
}

impl ServiceResponse {
    pub fn new(version: Option<String>, body: impl Into<String>) -> Self {
        Self {
            version,
            body: body.into(),
        }
    }

    /// Decode the body as the CLI's `{ success, error, data }` envelope.
    pub fn envelope(&self) -> Result<CliResponse, ServiceError> {
        serde_json::from_str(&self.body)
            .map_err(|err| ServiceError::InvalidResponse(format!("{err}: {}", self.body)))
    }
}

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },
    #[error("request to {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("invalid response from Percy CLI: {0}")]
    InvalidResponse(String),
}

/// Blocking request/response seam to the Percy CLI.
///
/// A `payload` of `None` issues a GET, anything else a JSON POST. Non-success
/// statuses are reported as [`ServiceError::Status`].
pub trait ServiceClient: Send + Sync {
    fn send(&self, path: &str, payload: Option<&JsonValue>) -> Result<ServiceResponse, ServiceError>;
}

/// Tagged envelope every CLI endpoint answers with.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliResponse {
    pub success: bool,
    #[serde(deserialize_with = "error_message")]
    pub error: Option<String>,
    pub data: Option<JsonValue>,
    #[serde(rename = "type")]
    pub session_type: Option<String>,
}

impl CliResponse {
    /// Convert a `success: false` envelope into its error message.
    pub fn into_result(self) -> Result<Option<JsonValue>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "Percy CLI reported an unknown error".to_string()))
        }
    }
}

// The CLI reports errors as strings, but older builds send an object.
fn error_message<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(message)) => Some(message),
        Some(other) => Some(other.to_string()),
    })
}

/// Default [`ServiceClient`] backed by `reqwest`'s blocking client.
pub struct HttpServiceClient {
    client: HttpClient,
    config: PercyConfig,
}

impl fmt::Debug for HttpServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServiceClient")
            .field("cli_api", &self.config.cli_api)
            .finish()
    }
}

impl HttpServiceClient {
    pub fn new(config: &PercyConfig) -> Result<Self, ServiceError> {
        let client = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| ServiceError::Transport {
                endpoint: config.cli_api.clone(),
                message: format!("failed to construct HTTP client: {err}"),
            })?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

impl ServiceClient for HttpServiceClient {
    fn send(&self, path: &str, payload: Option<&JsonValue>) -> Result<ServiceResponse, ServiceError> {
        let url = self.config.endpoint(path);
        let request = match payload {
            Some(body) => self.client.post(&url).json(body),
            None => self.client.get(&url),
        };

        let response = request.send().map_err(|err| ServiceError::Transport {
            endpoint: url.clone(),
            message: err.to_string(),
        })?;

        let status = response.status();
        let version = response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let body = response.text().map_err(|err| ServiceError::Transport {
            endpoint: url.clone(),
            message: err.to_string(),
        })?;

        if !status.is_success() {
            return Err(ServiceError::Status {
                endpoint: url,
                status: status.as_u16(),
                body,
            });
        }

        Ok(ServiceResponse { version, body })
    }
}
