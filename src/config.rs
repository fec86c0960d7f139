//! Configuration module for the cosmic uplink service.
//!
//! This module provides environment-based configuration for the uplink,
//! including the collector URL, measurement identity, and upload policy
//! settings. The measurement identity (`COSMIC_UPLINK_MEASUREMENT_ID` and
//! `COSMIC_UPLINK_AUTH_TOKEN`) is produced by the enrollment tooling and is
//! required; everything else has defaults.

use std::env;
use std::time::Duration;

/// Default remote collector base URL
const DEFAULT_SERVER_URL: &str = "http://accel-kitchen.com:3000";

/// Default seconds between upload cycles
const DEFAULT_UPLOAD_INTERVAL_SECS: u64 = 60;

/// Default per-cycle batch size cap (number of records per cycle)
const DEFAULT_BATCH_SIZE: usize = 100;

/// Default per-record send attempts within one cycle
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-request HTTP timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 3;

/// Minimum upload interval to avoid hammering the collector
const MIN_UPLOAD_INTERVAL_SECS: u64 = 1;

/// Maximum upload interval to keep data reasonably fresh
const MAX_UPLOAD_INTERVAL_SECS: u64 = 3_600;

/// Maximum allowed batch size to bound per-cycle memory
const MAX_BATCH_SIZE: usize = 10_000;

/// Maximum allowed per-record attempts
const MAX_MAX_ATTEMPTS: u32 = 10;

/// Configuration for the cosmic uplink service.
///
/// All settings can be configured via environment variables:
/// - `COSMIC_UPLINK_SERVER_URL`: collector base URL (default: http://accel-kitchen.com:3000)
/// - `COSMIC_UPLINK_MEASUREMENT_ID`: measurement identifier (required)
/// - `COSMIC_UPLINK_AUTH_TOKEN`: bearer token for the collector (required)
/// - `COSMIC_UPLINK_UPLOAD_INTERVAL_SECS`: seconds between cycles (default: 60)
/// - `COSMIC_UPLINK_BATCH_SIZE`: records per cycle (default: 100)
/// - `COSMIC_UPLINK_MAX_ATTEMPTS`: send attempts per record (default: 3)
/// - `COSMIC_UPLINK_REQUEST_TIMEOUT_SECS`: HTTP timeout (default: 3)
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote collector
    pub server_url: String,

    /// Measurement identifier assigned at enrollment
    pub measurement_id: String,

    /// Bearer token authenticating this measurement
    pub auth_token: String,

    /// Duration between periodic upload cycles
    pub upload_interval: Duration,

    /// Maximum number of records drained per regular cycle
    pub batch_size: usize,

    /// Maximum send attempts per record within one cycle
    pub max_attempts: u32,

    /// HTTP request timeout duration
    pub request_timeout: Duration,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Returns a new `Config` instance with values from environment variables,
    /// falling back to sensible defaults where appropriate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `COSMIC_UPLINK_MEASUREMENT_ID` or `COSMIC_UPLINK_AUTH_TOKEN` is unset or empty
    /// - `COSMIC_UPLINK_UPLOAD_INTERVAL_SECS` is not a valid number or exceeds limits
    /// - `COSMIC_UPLINK_BATCH_SIZE` is not a valid number or exceeds limits
    /// - `COSMIC_UPLINK_MAX_ATTEMPTS` is not a valid number or exceeds limits
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = env::var("COSMIC_UPLINK_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());

        // Normalize: the upload path is appended later
        let server_url = server_url.trim_end_matches('/').to_string();

        let measurement_id = Self::require("COSMIC_UPLINK_MEASUREMENT_ID")?;
        let auth_token = Self::require("COSMIC_UPLINK_AUTH_TOKEN")?;

        let upload_interval = Duration::from_secs(Self::parse_upload_interval()?);
        let batch_size = Self::parse_batch_size()?;
        let max_attempts = Self::parse_max_attempts()?;

        let request_timeout_secs: u64 = env::var("COSMIC_UPLINK_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        let request_timeout = Duration::from_secs(request_timeout_secs);

        Ok(Self {
            server_url,
            measurement_id,
            auth_token,
            upload_interval,
            batch_size,
            max_attempts,
            request_timeout,
        })
    }

    /// Read a required environment variable, rejecting empty values.
    fn require(env_var: &str) -> Result<String, ConfigError> {
        match env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            Ok(_) => Err(ConfigError {
                message: "value must not be empty".to_string(),
                env_var: Some(env_var.to_string()),
            }),
            Err(_) => Err(ConfigError {
                message: "required variable is not set".to_string(),
                env_var: Some(env_var.to_string()),
            }),
        }
    }

    /// Parse the upload interval from the environment with validation.
    fn parse_upload_interval() -> Result<u64, ConfigError> {
        let env_var = "COSMIC_UPLINK_UPLOAD_INTERVAL_SECS";

        match env::var(env_var) {
            Ok(value) => {
                let interval: u64 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if interval < MIN_UPLOAD_INTERVAL_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "upload interval {} is below minimum ({}s)",
                            interval, MIN_UPLOAD_INTERVAL_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if interval > MAX_UPLOAD_INTERVAL_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "upload interval {} exceeds maximum ({}s)",
                            interval, MAX_UPLOAD_INTERVAL_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(interval)
            }
            Err(_) => Ok(DEFAULT_UPLOAD_INTERVAL_SECS),
        }
    }

    /// Parse the batch size cap from the environment with validation.
    fn parse_batch_size() -> Result<usize, ConfigError> {
        let env_var = "COSMIC_UPLINK_BATCH_SIZE";

        match env::var(env_var) {
            Ok(value) => {
                let batch_size: usize = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if batch_size == 0 {
                    return Err(ConfigError {
                        message: "batch size must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if batch_size > MAX_BATCH_SIZE {
                    return Err(ConfigError {
                        message: format!(
                            "batch size {} exceeds maximum allowed ({})",
                            batch_size, MAX_BATCH_SIZE
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(batch_size)
            }
            Err(_) => Ok(DEFAULT_BATCH_SIZE),
        }
    }

    /// Parse the per-record attempt ceiling from the environment with validation.
    fn parse_max_attempts() -> Result<u32, ConfigError> {
        let env_var = "COSMIC_UPLINK_MAX_ATTEMPTS";

        match env::var(env_var) {
            Ok(value) => {
                let attempts: u32 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if attempts == 0 {
                    return Err(ConfigError {
                        message: "max attempts must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if attempts > MAX_MAX_ATTEMPTS {
                    return Err(ConfigError {
                        message: format!(
                            "max attempts {} exceeds maximum allowed ({})",
                            attempts, MAX_MAX_ATTEMPTS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(attempts)
            }
            Err(_) => Ok(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl Default for Config {
    /// Create a default configuration with a placeholder identity.
    ///
    /// This is useful for testing or local development against a
    /// collector that does not enforce enrollment.
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            measurement_id: "demo-measurement".to_string(),
            auth_token: "dev-token".to_string(),
            upload_interval: Duration::from_secs(DEFAULT_UPLOAD_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}
