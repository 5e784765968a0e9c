//! Client configuration.
//!
//! Resolution order: built-in defaults, then a JSON document supplied by the
//! host (optional), then `LEXCONNECT_*` environment variables. The result is
//! validated before use.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::capabilities::ValidatedUrl;
use crate::{
    AppError, ErrorKind, DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_UPLOAD_MIME_TYPES,
    MAX_DOCUMENT_BYTES, MIN_POLL_INTERVAL, UPLOAD_REQUEST_TIMEOUT,
};

pub const ENV_PREFIX: &str = "LEXCONNECT_";
pub const DEFAULT_API_BASE_URL: &str = "https://api.lexconnect.app/v1";
pub const DEFAULT_REALTIME_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("could not parse {var}='{value}': {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error("malformed configuration document: {0}")]
    Malformed(String),
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Give up on a task after this long. `None` polls until terminal.
    pub poll_max_duration_ms: Option<u64>,
    pub max_upload_bytes: usize,
    pub allowed_mime_types: Vec<String>,
    pub realtime_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_ms: duration_ms(DEFAULT_REQUEST_TIMEOUT),
            upload_timeout_ms: duration_ms(UPLOAD_REQUEST_TIMEOUT),
            poll_interval_ms: duration_ms(DEFAULT_POLL_INTERVAL),
            poll_max_duration_ms: None,
            max_upload_bytes: MAX_DOCUMENT_BYTES,
            allowed_mime_types: DEFAULT_UPLOAD_MIME_TYPES
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
            realtime_buffer: DEFAULT_REALTIME_BUFFER,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `LEXCONNECT_*` overrides read through `lookup`, then validates.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let var = format!("{ENV_PREFIX}{name}");
            lookup(&var).map(|value| (var, value))
        };

        if let Some((_, value)) = get("API_BASE_URL") {
            self.api_base_url = value;
        }
        if let Some((var, value)) = get("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_env(&var, &value)?;
        }
        if let Some((var, value)) = get("UPLOAD_TIMEOUT_MS") {
            self.upload_timeout_ms = parse_env(&var, &value)?;
        }
        if let Some((var, value)) = get("POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_env(&var, &value)?;
        }
        if let Some((var, value)) = get("POLL_MAX_DURATION_MS") {
            self.poll_max_duration_ms = if value.trim().is_empty() || value.trim() == "0" {
                None
            } else {
                Some(parse_env(&var, &value)?)
            };
        }
        if let Some((var, value)) = get("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_env(&var, &value)?;
        }
        if let Some((_, value)) = get("ALLOWED_MIME_TYPES") {
            self.allowed_mime_types = value
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_lowercase)
                .collect();
        }
        if let Some((var, value)) = get("REALTIME_BUFFER") {
            self.realtime_buffer = parse_env(&var, &value)?;
        }

        self.validate()?;
        debug!(api_base_url = %self.api_base_url, "Client configuration resolved");
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ValidatedUrl::new(self.api_base_url.clone()).map_err(|e| ConfigError::InvalidValue {
            field: "api_base_url",
            reason: e.to_string(),
        })?;

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.upload_timeout_ms < self.request_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "upload_timeout_ms",
                reason: "must be at least request_timeout_ms".into(),
            });
        }
        if self.poll_interval_ms < duration_ms(MIN_POLL_INTERVAL) {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: format!("must be at least {}ms", duration_ms(MIN_POLL_INTERVAL)),
            });
        }
        if matches!(self.poll_max_duration_ms, Some(max) if max < self.poll_interval_ms) {
            return Err(ConfigError::InvalidValue {
                field: "poll_max_duration_ms",
                reason: "must be at least one poll interval".into(),
            });
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_upload_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.allowed_mime_types.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "allowed_mime_types",
                reason: "at least one MIME type is required".into(),
            });
        }
        if self.realtime_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "realtime_buffer",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_max_duration(&self) -> Option<Duration> {
        self.poll_max_duration_ms.map(Duration::from_millis)
    }
}

fn parse_env<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
