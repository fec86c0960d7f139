//! HTTP client module for delivering event records to the collector.
//!
//! Each record is posted individually to the collector's upload endpoint
//! with bounded retries and exponential backoff. The client classifies
//! every attempt into one of three outcomes; it never requeues — that is
//! the scheduler's job.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::record::EventRecord;

/// First backoff delay; doubles per attempt (1s, 2s, 4s, ...).
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Caps the doubling so pathological attempt ceilings stay bounded.
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Outcome of one record's delivery within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The collector accepted the record (HTTP 200); it is gone for good.
    Delivered,

    /// The collector rejected our credentials (HTTP 401/403). Not retried;
    /// the token will not become valid again on its own.
    AuthRejected,

    /// Every attempt failed with a transient error; eligible for requeue.
    Failed,
}

/// Error building the HTTP client.
#[derive(Debug)]
pub struct ClientError {
    pub message: String,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to build upload client: {}", self.message)
    }
}

impl std::error::Error for ClientError {}

/// HTTP client bound to one measurement session.
///
/// The destination URL, measurement identifier, and bearer token are fixed
/// at construction and never change for the process lifetime. The underlying
/// reqwest client is reused for connection pooling.
pub struct UploadClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Full URL of the per-measurement upload endpoint
    upload_url: String,

    /// Bearer token authenticating this measurement
    auth_token: String,

    /// Maximum send attempts per record within one cycle
    max_attempts: u32,

    /// First retry delay; doubles per subsequent attempt
    backoff_base: Duration,
}

impl UploadClient {
    /// Create an upload client for the configured measurement session.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(
            format!(
                "{}/upload-data/{}",
                config.server_url, config.measurement_id
            ),
            config.auth_token.clone(),
            config.request_timeout,
            config.max_attempts,
            RETRY_BASE_DELAY,
        )
    }

    /// Create an upload client with explicit settings.
    ///
    /// This is useful for testing or when you need more control than the
    /// environment configuration offers (e.g. millisecond backoff in tests).
    pub fn with_settings(
        upload_url: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            upload_url: upload_url.into(),
            auth_token: auth_token.into(),
            max_attempts,
            backoff_base,
        })
    }

    /// Attempt delivery of one record, with bounded retry and backoff.
    ///
    /// HTTP 200 is success. 401/403 aborts immediately: the token has
    /// expired and no amount of retrying will fix it. Any other status or
    /// transport error is transient; the attempt is retried after an
    /// exponential backoff until the attempt ceiling is reached.
    ///
    /// Backoff sleeps happen here, outside any buffer lock.
    pub async fn send_record(&self, record: &EventRecord) -> SendOutcome {
        for attempt in 1..=self.max_attempts {
            match self.post_record(record).await {
                Ok(status) if status == StatusCode::OK => {
                    debug!(
                        sequence = record.sequence,
                        attempt = attempt,
                        "Record accepted by collector"
                    );
                    return SendOutcome::Delivered;
                }
                Ok(status)
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
                {
                    error!(
                        sequence = record.sequence,
                        status = %status,
                        "Authentication rejected; token may have expired"
                    );
                    return SendOutcome::AuthRejected;
                }
                Ok(status) => {
                    warn!(
                        sequence = record.sequence,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        status = %status,
                        "Collector refused record"
                    );
                }
                Err(e) => {
                    warn!(
                        sequence = record.sequence,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Network error sending record"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }
        }

        SendOutcome::Failed
    }

    /// Send a single HTTP request without retry logic.
    async fn post_record(&self, record: &EventRecord) -> Result<StatusCode, reqwest::Error> {
        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&self.auth_token)
            .json(record)
            .send()
            .await?;

        Ok(response.status())
    }

    /// Backoff delay after the given attempt number (1-based): base * 2^(n-1).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.backoff_base * 2u32.saturating_pow(exponent)
    }

    /// Get the configured upload endpoint URL.
    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Get the per-record attempt ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
