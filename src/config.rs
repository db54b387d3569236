//! Strongly-typed configuration for the Percy SDK.
//!
//! Values start from defaults, can be loaded from environment variables (with
//! optional `.env` support), and can be adjusted with explicit overrides for
//! programmatic setups such as test harnesses.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

use crate::logging::LogCallback;

/// Default address of the local Percy CLI server.
pub const DEFAULT_CLI_API: &str = "http://localhost:5338";

/// Default transport timeout. Snapshot uploads can take a long time to settle.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10 * 60 * 1_000;

/// Client identifier reported with every capture.
pub const CLIENT_INFO: &str = concat!("percy-rs/", env!("CARGO_PKG_VERSION"));

/// Environment identifier reported with every capture.
pub const ENVIRONMENT_INFO: &str = "chromiumoxide; rust";

/// Verbosity level for SDK diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Minimal,
    #[default]
    Medium,
    Detailed,
}

impl Verbosity {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Verbosity::Detailed),
            "info" => Some(Verbosity::Medium),
            "error" | "silent" => Some(Verbosity::Minimal),
            _ => None,
        }
    }
}

/// Configuration values for a [`Percy`](crate::percy::Percy) instance.
#[derive(Clone)]
pub struct PercyConfig {
    pub cli_api: String,
    pub verbose: Verbosity,
    pub request_timeout_ms: u64,
    pub client_info: String,
    pub environment_info: String,
    pub logger: Option<LogCallback>,
}

impl Default for PercyConfig {
    fn default() -> Self {
        let cli_api = env::var("PERCY_CLI_API").unwrap_or_else(|_| DEFAULT_CLI_API.to_string());
        PercyConfig {
            cli_api,
            verbose: Verbosity::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            client_info: CLIENT_INFO.to_string(),
            environment_info: ENVIRONMENT_INFO.to_string(),
            logger: None,
        }
    }
}

impl PercyConfig {
    /// Construct a configuration by reading the `PERCY_*` environment
    /// variables, after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, PercyConfigError> {
        let _ = dotenv();
        let mut config = PercyConfig::default();

        if let Some(value) = env_var("PERCY_CLI_API") {
            config.cli_api = value;
        }

        if let Some(value) = env_var("PERCY_LOGLEVEL") {
            config.verbose = Verbosity::parse(&value).ok_or_else(|| {
                PercyConfigError::InvalidEnumVariant {
                    field: "PERCY_LOGLEVEL",
                    value: value.clone(),
                }
            })?;
        }

        if let Some(value) = env_var("PERCY_CLIENT_TIMEOUT_MS") {
            config.request_timeout_ms = parse_u64("PERCY_CLIENT_TIMEOUT_MS", &value)?;
        }

        Ok(config)
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: PercyConfigOverrides) -> PercyConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.cli_api {
            next.cli_api = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }
        if let Some(value) = overrides.request_timeout_ms {
            next.request_timeout_ms = value;
        }
        if let Some(value) = overrides.client_info {
            next.client_info = value;
        }
        if let Some(value) = overrides.environment_info {
            next.environment_info = value;
        }
        if let Some(value) = overrides.logger {
            next.logger = value;
        }

        next
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Absolute URL for a CLI endpoint path such as `/percy/healthcheck`.
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.cli_api.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

/// Field-level overrides for [`PercyConfig::with_overrides`].
#[derive(Default, Clone)]
pub struct PercyConfigOverrides {
    pub cli_api: Option<String>,
    pub verbose: Option<Verbosity>,
    pub request_timeout_ms: Option<u64>,
    pub client_info: Option<String>,
    pub environment_info: Option<String>,
    pub logger: Option<Option<LogCallback>>,
}

impl PercyConfigOverrides {
    pub fn cli_api(mut self, cli_api: impl Into<String>) -> Self {
        self.cli_api = Some(cli_api.into());
        self
    }

    pub fn verbose(mut self, verbose: Verbosity) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn logger<T: Into<Option<LogCallback>>>(mut self, logger: T) -> Self {
        self.logger = Some(logger.into());
        self
    }
}

impl fmt::Debug for PercyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PercyConfig")
            .field("cli_api", &self.cli_api)
            .field("verbose", &self.verbose)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("client_info", &self.client_info)
            .field("environment_info", &self.environment_info)
            .field("logger_present", &self.logger.is_some())
            .finish()
    }
}

impl fmt::Debug for PercyConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PercyConfigOverrides")
            .field("cli_api", &self.cli_api)
            .field("verbose", &self.verbose)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("client_info", &self.client_info)
            .field("environment_info", &self.environment_info)
            .field("logger", &self.logger.as_ref().map(|inner| inner.is_some()))
            .finish()
    }
}

/// Errors that can arise while constructing a [`PercyConfig`].
#[derive(Debug, Error)]
pub enum PercyConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, PercyConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| PercyConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}
