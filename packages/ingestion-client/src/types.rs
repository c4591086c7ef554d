//! Request and response types for the ingestion service API.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How much detail the remote ingestion collects for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestDepth {
    /// Full ingestion including per-lap data.
    LapsFull,
    /// Event shell only, no race data.
    None,
}

/// Outcome of an ingest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Updated,
    AlreadyComplete,
    InProgress,
}

/// A remote event discovered for a track.
///
/// Scraped listing data: everything past the identifying fields is optional
/// because the remote timing provider does not always publish it.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredEvent {
    pub source: String,
    pub source_event_id: String,
    pub track_slug: String,
    pub event_name: String,
    pub event_date: Option<DateTime<Utc>>,
    pub event_entries: Option<i64>,
    pub event_drivers: Option<i64>,
    pub event_url: Option<String>,
}

/// One driver entry from an event entry list.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryListDriver {
    pub driver_name: String,
    pub car_number: Option<String>,
    pub transponder: Option<String>,
}

/// Per-class entry list for a single event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEntryList {
    pub source_event_id: String,
    pub entries_by_class: HashMap<String, Vec<EntryListDriver>>,
}

/// Result of a completed ingest run.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestEventResult {
    pub event_id: String,
    pub ingest_depth: IngestDepth,
    pub last_ingested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub races_ingested: u64,
    #[serde(default)]
    pub results_ingested: u64,
    #[serde(default)]
    pub laps_ingested: u64,
    pub status: IngestStatus,
}

/// HTTP 202 payload: the ingest was queued as a background job.
#[derive(Debug, Clone, Deserialize)]
pub struct QueuedJob {
    pub job_id: String,
    pub status: String,
}

/// Lifecycle phase of a server-side ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    InProgress,
    Completed,
    Failed,
    /// Phases the service introduced after this client shipped. Treated as
    /// still-running so polling keeps going instead of crashing.
    #[serde(other)]
    Unknown,
}

/// Polled state of an ingestion job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobState {
    pub status: JobPhase,
    pub result: Option<JobResult>,
    pub error_message: Option<String>,
}

/// Result payload embedded in a completed job. Fields the job runner does
/// not report are filled in by the caller that queued the job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobResult {
    pub event_id: Option<String>,
    pub ingest_depth: Option<IngestDepth>,
    pub last_ingested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub races_ingested: u64,
    #[serde(default)]
    pub results_ingested: u64,
    #[serde(default)]
    pub laps_ingested: u64,
    pub status: Option<IngestStatus>,
}

/// Current ingestion bookkeeping for an event.
///
/// The status endpoint serves this record directly, without the usual
/// response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionStatus {
    pub event_id: String,
    pub ingest_depth: Option<IngestDepth>,
    pub last_ingested_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DiscoverEventsRequest<'a> {
    pub track_slug: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EntryListRequest<'a> {
    pub track_slug: &'a str,
    pub source_event_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct IngestRequest {
    pub depth: IngestDepth,
}

#[derive(Debug, Serialize)]
pub(crate) struct IngestBySourceRequest<'a> {
    pub source_event_id: &'a str,
    pub track_id: &'a str,
    pub depth: IngestDepth,
}

/// Payload of `POST /api/v1/events/discover`.
#[derive(Debug, Deserialize)]
pub(crate) struct DiscoverEventsData {
    pub events: Vec<DiscoveredEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_job_phase_keeps_polling_viable() {
        let state: JobState = serde_json::from_value(json!({
            "status": "paused_for_maintenance"
        }))
        .unwrap();
        assert_eq!(state.status, JobPhase::Unknown);
        assert!(state.result.is_none());
    }

    #[test]
    fn ingest_depth_uses_wire_names() {
        assert_eq!(
            serde_json::to_value(IngestDepth::LapsFull).unwrap(),
            json!("laps_full")
        );
        assert_eq!(serde_json::to_value(IngestDepth::None).unwrap(), json!("none"));
    }

    #[test]
    fn discover_request_omits_absent_dates() {
        let body = DiscoverEventsRequest {
            track_slug: "oval-track-1",
            start_date: None,
            end_date: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"track_slug": "oval-track-1"})
        );
    }
}
