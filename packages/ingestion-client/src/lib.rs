//! Pure REST API client for the Raceline ingestion service.
//!
//! The ingestion service scrapes remote timing providers (LiveRC) and
//! imports race events into Raceline. This crate is the only way the
//! application talks to it: discover events for a track, fetch entry lists,
//! trigger ingestion, and poll asynchronous ingestion jobs to completion.
//!
//! Failure handling is the point of this crate. Connection blips are retried
//! with capped exponential backoff, per-attempt abort timers keep callers
//! from hanging, and the discovery endpoint sits behind a circuit breaker so
//! a dead scraper service fails fast instead of stalling every dashboard.
//!
//! # Example
//!
//! ```rust,ignore
//! use ingestion_client::{IngestDepth, IngestionClient};
//!
//! let client = IngestionClient::from_env()?;
//!
//! let events = client.discover_events("oval-track-1", None, None).await?;
//! for event in &events {
//!     println!("{} ({})", event.event_name, event.source_event_id);
//! }
//!
//! let result = client.ingest_event("evt-1", IngestDepth::LapsFull).await?;
//! println!("{} laps ingested", result.laps_ingested);
//! ```

pub mod breaker;
pub mod error;
pub mod types;

mod envelope;
mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerState, CircuitState};
pub use error::{IngestionError, Result, ServiceError};
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use retry::RetryPolicy;

/// Environment variable naming the ingestion service base URL.
const BASE_URL_ENV: &str = "INGESTION_SERVICE_URL";

/// Per-operation budgets for the client.
///
/// The defaults mirror production: discovery and entry-list calls are
/// interactive (a dashboard is waiting), ingest runs can legitimately take
/// minutes, and queued jobs are polled for up to fifteen minutes. The
/// per-attempt ingest budget is far larger than the 5s backoff ceiling:
/// retries smooth connection blips, they do not wait out a down service.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Budget for discovery and entry-list calls.
    pub discovery_timeout: Duration,
    /// Per-attempt budget for ingest calls.
    pub ingest_timeout: Duration,
    /// Retries after the initial ingest attempt.
    pub ingest_max_retries: u32,
    /// Delay between polls of an asynchronous ingestion job.
    pub job_poll_interval: Duration,
    /// Polls before giving up on a job. The job keeps running server-side.
    pub job_poll_max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(120),
            ingest_timeout: Duration::from_secs(600),
            ingest_max_retries: 3,
            job_poll_interval: Duration::from_secs(2),
            job_poll_max_attempts: 450,
        }
    }
}

/// Client for the Raceline ingestion service.
#[derive(Clone)]
pub struct IngestionClient {
    http: reqwest::Client,
    base_url: String,
    config: ClientConfig,
    breaker: Arc<CircuitBreaker>,
}

impl IngestionClient {
    /// Create a client for the service at `base_url` with default budgets.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_config(base_url, ClientConfig::default())
    }

    /// Create a client with custom per-operation budgets.
    pub fn with_config(base_url: impl Into<String>, config: ClientConfig) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            config,
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    /// Create from the `INGESTION_SERVICE_URL` environment variable.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(BASE_URL_ENV)
            .map_err(|_| IngestionError::Config(format!("{BASE_URL_ENV} not set")))?;
        Ok(Self::new(base_url))
    }

    /// The configured service base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The circuit breaker guarding the discovery endpoint.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// List remote events discoverable for a track, optionally restricted to
    /// a date window.
    ///
    /// Gated by the discovery circuit breaker: while the breaker is open the
    /// call is rejected immediately, without touching the network.
    pub async fn discover_events(
        &self,
        track_slug: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<DiscoveredEvent>> {
        if self.breaker.is_open() {
            let last_failure = self.breaker.state().last_failure.unwrap_or_else(Utc::now);
            return Err(IngestionError::CircuitOpen { last_failure });
        }

        info!(track_slug, "Discovering events");
        let url = format!("{}/api/v1/events/discover", self.base_url);
        let body = DiscoverEventsRequest {
            track_slug,
            start_date,
            end_date,
        };

        let outcome = retry::send_with_retry(
            RetryPolicy {
                attempt_timeout: self.config.discovery_timeout,
                max_retries: 0,
            },
            "event discovery",
            &url,
            || self.http.post(&url).json(&body),
        )
        .await
        .and_then(|(status, text)| {
            let data: DiscoverEventsData = envelope::decode(status, &text)?;
            Ok(data.events)
        });

        match &outcome {
            Ok(events) => {
                self.breaker.record_success();
                info!(track_slug, count = events.len(), "Event discovery completed");
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(track_slug, error = %err, "Event discovery failed");
            }
        }
        outcome
    }

    /// Fetch the per-class entry list for a remote event.
    pub async fn get_event_entry_list(
        &self,
        track_slug: &str,
        source_event_id: &str,
    ) -> Result<EventEntryList> {
        info!(track_slug, source_event_id, "Fetching event entry list");
        let url = format!("{}/api/v1/events/entry-list", self.base_url);
        let body = EntryListRequest {
            track_slug,
            source_event_id,
        };
        let (status, text) = retry::send_with_retry(
            RetryPolicy {
                attempt_timeout: self.config.discovery_timeout,
                max_retries: 0,
            },
            "entry list fetch",
            &url,
            || self.http.post(&url).json(&body),
        )
        .await?;
        let entry_list: EventEntryList = envelope::decode(status, &text)?;
        Ok(entry_list)
    }

    /// Trigger ingestion of a known event and wait for the outcome.
    ///
    /// The service either performs the ingest synchronously (HTTP 200 with
    /// the result) or queues it as a background job (HTTP 202), in which
    /// case the job is polled until it finishes.
    pub async fn ingest_event(&self, event_id: &str, depth: IngestDepth) -> Result<IngestEventResult> {
        info!(event_id, ?depth, "Ingesting event");
        let url = format!("{}/api/v1/events/{}/ingest", self.base_url, event_id);
        let body = IngestRequest { depth };
        let (status, text) = retry::send_with_retry(
            self.ingest_policy(),
            "event ingest",
            &url,
            || self.http.post(&url).json(&body),
        )
        .await?;
        self.finish_ingest(event_id, depth, status, &text).await
    }

    /// Trigger ingestion keyed by the remote source id, for events Raceline
    /// has not stored yet.
    pub async fn ingest_event_by_source_id(
        &self,
        source_event_id: &str,
        track_id: &str,
        depth: IngestDepth,
    ) -> Result<IngestEventResult> {
        info!(source_event_id, track_id, ?depth, "Ingesting event by source id");
        let url = format!("{}/api/v1/events/ingest", self.base_url);
        let body = IngestBySourceRequest {
            source_event_id,
            track_id,
            depth,
        };
        let (status, text) = retry::send_with_retry(
            self.ingest_policy(),
            "event ingest",
            &url,
            || self.http.post(&url).json(&body),
        )
        .await?;
        self.finish_ingest(source_event_id, depth, status, &text).await
    }

    /// One-shot ingestion bookkeeping for an event. No retry wrapper; the
    /// endpoint serves the record directly, without the response envelope.
    pub async fn get_ingestion_status(&self, event_id: &str) -> Result<IngestionStatus> {
        let url = format!("{}/api/v1/ingestion/status/{}", self.base_url, event_id);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok(envelope::decode_plain(status, &text)?)
    }

    /// Poll an ingestion job until it reaches a terminal state.
    ///
    /// Polls every `job_poll_interval` up to `job_poll_max_attempts` times
    /// (the defaults give roughly fifteen minutes). Exhausting the budget is
    /// not a hard failure: the job keeps running server-side, and the error
    /// says so.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<IngestEventResult> {
        self.wait_for_job_with_context(job_id, None, None).await
    }

    fn ingest_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: self.config.ingest_timeout,
            max_retries: self.config.ingest_max_retries,
        }
    }

    /// Interpret an ingest response. A 202 means the work was queued and the
    /// job has to be polled to completion.
    async fn finish_ingest(
        &self,
        event_id: &str,
        depth: IngestDepth,
        status: StatusCode,
        body: &str,
    ) -> Result<IngestEventResult> {
        if status == StatusCode::ACCEPTED {
            let queued: QueuedJob = envelope::decode(status, body)?;
            info!(event_id, job_id = %queued.job_id, "Ingest queued as background job");
            return self
                .wait_for_job_with_context(&queued.job_id, Some(event_id), Some(depth))
                .await;
        }
        let result: IngestEventResult = envelope::decode(status, body)?;
        info!(
            event_id,
            status = ?result.status,
            races = result.races_ingested,
            laps = result.laps_ingested,
            "Ingest completed"
        );
        Ok(result)
    }

    async fn wait_for_job_with_context(
        &self,
        job_id: &str,
        event_id: Option<&str>,
        depth: Option<IngestDepth>,
    ) -> Result<IngestEventResult> {
        let url = format!("{}/api/v1/ingestion/jobs/{}", self.base_url, job_id);
        for _ in 0..self.config.job_poll_max_attempts {
            let response = self.http.get(&url).send().await?;
            let status = response.status();
            let text = response.text().await?;
            let state: JobState = envelope::decode(status, &text)?;
            match state.status {
                JobPhase::Completed => {
                    let result = state.result.ok_or_else(|| ServiceError {
                        code: "missing_result".into(),
                        message: format!("job {job_id} completed without a result payload"),
                        source: envelope::LOCAL_SOURCE.into(),
                        details: serde_json::Value::Null,
                        status_code: status.as_u16(),
                    })?;
                    info!(
                        job_id,
                        races = result.races_ingested,
                        laps = result.laps_ingested,
                        "Ingestion job completed"
                    );
                    return Ok(assemble_job_result(result, event_id, depth, job_id));
                }
                JobPhase::Failed => {
                    return Err(IngestionError::JobFailed {
                        job_id: job_id.to_string(),
                        message: state
                            .error_message
                            .unwrap_or_else(|| "no error message reported".into()),
                    });
                }
                phase => {
                    debug!(job_id, status = ?phase, "Job still in progress");
                    sleep(self.config.job_poll_interval).await;
                }
            }
        }
        Err(IngestionError::JobStillRunning {
            job_id: job_id.to_string(),
            waited: self.config.job_poll_interval * self.config.job_poll_max_attempts,
        })
    }
}

/// Build the caller-facing result from a completed job, filling fields the
/// job runner omitted from the context of the originating call.
fn assemble_job_result(
    result: JobResult,
    event_id: Option<&str>,
    depth: Option<IngestDepth>,
    job_id: &str,
) -> IngestEventResult {
    IngestEventResult {
        event_id: result
            .event_id
            .or_else(|| event_id.map(str::to_owned))
            .unwrap_or_else(|| job_id.to_owned()),
        ingest_depth: result.ingest_depth.or(depth).unwrap_or(IngestDepth::LapsFull),
        last_ingested_at: result.last_ingested_at,
        races_ingested: result.races_ingested,
        results_ingested: result.results_ingested,
        laps_ingested: result.laps_ingested,
        status: result.status.unwrap_or(IngestStatus::Updated),
    }
}
