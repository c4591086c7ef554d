//! Error types for the ingestion client.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for ingestion client operations.
pub type Result<T> = std::result::Result<T, IngestionError>;

/// Structured error reported by the ingestion service.
///
/// Built from the `{success: false, error: {...}}` envelope, or synthesized
/// when a response cannot be interpreted. The raw payload is preserved in
/// `details` so callers can log it without re-parsing the response.
#[derive(Debug, Clone)]
pub struct ServiceError {
    /// Machine-readable error code, e.g. `"TRACK_NOT_FOUND"`.
    pub code: String,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Subsystem that reported the error, e.g. `"liverc_scraper"`.
    pub source: String,
    /// Raw context attached by the service, or the unparsed payload.
    pub details: serde_json::Value,
    /// HTTP status of the response that carried the error.
    pub status_code: u16,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ingestion service error {} (status {}): {}",
            self.code, self.status_code, self.message
        )
    }
}

// Implemented by hand: the `source` field holds the reporting subsystem name,
// which the thiserror derive would treat as an error cause.
impl std::error::Error for ServiceError {}

/// Ingestion client errors.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Configuration error (missing base URL, invalid settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// The discovery circuit breaker is open; no request was attempted.
    #[error("ingestion service circuit breaker is open (last failure at {last_failure}); the call was rejected without contacting the service")]
    CircuitOpen {
        /// When the breaker last recorded a failure.
        last_failure: DateTime<Utc>,
    },

    /// An attempt exceeded its time budget. Never retried: the service may
    /// still finish the operation server-side.
    #[error("{operation} timed out after {}s; the service may still be processing the request", .timeout.as_secs())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// Connection-level failure that survived every retry.
    #[error("cannot connect to ingestion service at {url} after {attempts} attempts: {message}")]
    Connection {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The service reported a structured error, or sent a response this
    /// client could not interpret.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Transport failure that is neither a timeout nor a connection error.
    #[error("ingestion service request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A background ingestion job finished in the failed state.
    #[error("ingestion job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    /// Polling budget exhausted. Not a hard failure: the job keeps running
    /// server-side and its outcome lands through the usual status endpoint.
    #[error("ingestion job {job_id} is taking longer than expected (waited {}s); it may still complete in the background", .waited.as_secs())]
    JobStillRunning { job_id: String, waited: Duration },
}
