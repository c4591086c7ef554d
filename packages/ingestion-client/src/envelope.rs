//! Decoding of the ingestion service response envelope.
//!
//! Every enveloped endpoint answers `{success: true, data: ...}` or
//! `{success: false, error: {...}}`. Bodies that match neither shape still
//! show up in practice (reverse proxies, handlers that crashed mid-request),
//! so decoding never panics and always carries the raw payload into the
//! resulting error.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ServiceError;

/// `source` value for errors synthesized locally rather than reported by
/// the service.
pub(crate) const LOCAL_SOURCE: &str = "ingestion-client";

/// `source` fallback when the service omits it from an error envelope.
const SERVICE_SOURCE: &str = "ingestion-service";

/// Longest slice of an uninterpretable body kept in error details.
const BODY_PREVIEW_LEN: usize = 500;

/// A response body, keyed on the `success` discriminant.
#[derive(Debug)]
enum Payload {
    /// `{success: true, data}`
    Success(Value),
    /// `{success: false, error}`
    Failure(ErrorBody),
    /// Anything else: proxy pages, bare `{"detail": ...}` shapes, etc.
    Unrecognized(Value),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    source: Option<String>,
    details: Option<Value>,
}

fn classify(value: Value) -> Payload {
    match value.get("success").and_then(Value::as_bool) {
        Some(true) => match value.get("data") {
            Some(data) => Payload::Success(data.clone()),
            None => Payload::Unrecognized(value),
        },
        Some(false) => {
            let body = value
                .get("error")
                .cloned()
                .and_then(|e| serde_json::from_value::<ErrorBody>(e).ok());
            match body {
                Some(body) => Payload::Failure(body),
                None => Payload::Unrecognized(value),
            }
        }
        None => Payload::Unrecognized(value),
    }
}

/// Decode an enveloped response into the expected `data` payload.
pub(crate) fn decode<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<T, ServiceError> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return Err(unparseable(status, body)),
    };

    match classify(value) {
        Payload::Success(data) if status.is_success() => serde_json::from_value(data.clone())
            .map_err(|err| ServiceError {
                code: "malformed_response".into(),
                message: format!("unexpected response format from ingestion service: {err}"),
                source: LOCAL_SOURCE.into(),
                details: data,
                status_code: status.as_u16(),
            }),
        // Non-2xx is a failure no matter what the body claims.
        Payload::Success(data) => Err(ServiceError {
            code: "http_error".into(),
            message: status_message(status),
            source: LOCAL_SOURCE.into(),
            details: data,
            status_code: status.as_u16(),
        }),
        Payload::Failure(error) => Err(ServiceError {
            code: error.code.unwrap_or_else(|| "unknown_error".into()),
            message: error.message.unwrap_or_else(|| status_message(status)),
            source: error.source.unwrap_or_else(|| SERVICE_SOURCE.into()),
            details: error.details.unwrap_or(Value::Null),
            status_code: status.as_u16(),
        }),
        Payload::Unrecognized(raw) => Err(ServiceError {
            code: "unexpected_response".into(),
            message: fallback_message(&raw)
                .unwrap_or_else(|| "unexpected response format from ingestion service".into()),
            source: LOCAL_SOURCE.into(),
            details: raw,
            status_code: status.as_u16(),
        }),
    }
}

/// Decode a response from an endpoint that serves its payload directly,
/// without the envelope.
pub(crate) fn decode_plain<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<T, ServiceError> {
    if !status.is_success() {
        let details: Value =
            serde_json::from_str(body).unwrap_or_else(|_| Value::String(preview(body)));
        return Err(ServiceError {
            code: "http_error".into(),
            message: fallback_message(&details).unwrap_or_else(|| status_message(status)),
            source: LOCAL_SOURCE.into(),
            details,
            status_code: status.as_u16(),
        });
    }
    serde_json::from_str(body).map_err(|err| ServiceError {
        code: "malformed_response".into(),
        message: format!("unexpected response format from ingestion service: {err}"),
        source: LOCAL_SOURCE.into(),
        details: Value::String(preview(body)),
        status_code: status.as_u16(),
    })
}

/// Best-effort extraction of a human message from shapes other frameworks
/// and proxies are known to send.
fn fallback_message(value: &Value) -> Option<String> {
    ["error", "message", "detail", "error_type"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_owned)
}

fn unparseable(status: StatusCode, body: &str) -> ServiceError {
    ServiceError {
        code: "invalid_response".into(),
        message: status_message(status),
        source: LOCAL_SOURCE.into(),
        details: Value::String(preview(body)),
        status_code: status.as_u16(),
    }
}

fn status_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_owned)
        .unwrap_or_else(|| status.to_string())
}

fn preview(body: &str) -> String {
    if body.chars().count() > BODY_PREVIEW_LEN {
        let truncated: String = body.chars().take(BODY_PREVIEW_LEN).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}
