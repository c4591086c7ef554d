//! Retry executor for transient connection failures.
//!
//! Wraps a single HTTP call with a per-attempt abort timer and bounded
//! retries. Only connection-class failures are retried; a timed-out attempt
//! surfaces immediately, because the service may still be doing the work and
//! a retry would double it.

use std::future::Future;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::{IngestionError, Result};

/// Longest single wait between retries. The retry loop smooths transient
/// connection blips; waiting out a genuinely down dependency is the circuit
/// breaker's job.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Per-operation retry budget.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// Abort timer applied to each attempt.
    pub attempt_timeout: Duration,
    /// Retries after the initial attempt; 0 means try once.
    pub max_retries: u32,
}

/// Transport failure classification. The retry loop switches on this enum;
/// string inspection happens only at the reqwest boundary in [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    Timeout,
    Connection,
    Other,
}

/// Outcome of a single attempt, as seen by the retry loop.
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// Connection-class failure, eligible for retry.
    Connection(String),
    /// The transport itself reported a timeout.
    Timeout,
    /// Anything else: surfaced unmodified on first occurrence.
    Fatal(IngestionError),
}

/// Issue an HTTP request with retries for connection-class failures.
///
/// `build` must return a fresh builder on every call, since `send()`
/// consumes it. Returns the response status and body text; interpreting
/// them is the caller's concern.
pub(crate) async fn send_with_retry<F>(
    policy: RetryPolicy,
    operation: &str,
    url: &str,
    build: F,
) -> Result<(StatusCode, String)>
where
    F: Fn() -> RequestBuilder,
{
    run_with_retry(policy, operation, url, || {
        let builder = build();
        async move {
            match send_once(builder).await {
                Ok(response) => Ok(response),
                Err(err) => Err(match classify(&err) {
                    FailureKind::Timeout => AttemptError::Timeout,
                    FailureKind::Connection => AttemptError::Connection(err.to_string()),
                    FailureKind::Other => AttemptError::Fatal(IngestionError::Http(err)),
                }),
            }
        }
    })
    .await
}

/// The retry loop itself, transport-agnostic so tests can drive it with
/// scripted attempts.
pub(crate) async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    url: &str,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut attempt = 0;
    loop {
        match timeout(policy.attempt_timeout, attempt_fn()).await {
            Err(_) => return Err(timeout_error(operation, policy.attempt_timeout)),
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(AttemptError::Timeout)) => {
                return Err(timeout_error(operation, policy.attempt_timeout))
            }
            Ok(Err(AttemptError::Fatal(err))) => return Err(err),
            Ok(Err(AttemptError::Connection(message))) => {
                if attempt < policy.max_retries {
                    let delay = backoff(attempt);
                    warn!(
                        operation,
                        url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Connection to ingestion service failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                } else {
                    return Err(IngestionError::Connection {
                        url: url.to_string(),
                        attempts: policy.max_retries + 1,
                        message,
                    });
                }
            }
        }
    }
}

async fn send_once(
    builder: RequestBuilder,
) -> std::result::Result<(StatusCode, String), reqwest::Error> {
    let response = builder.send().await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

fn timeout_error(operation: &str, timeout: Duration) -> IngestionError {
    IngestionError::Timeout {
        operation: operation.to_string(),
        timeout,
    }
}

/// Exponential backoff: 1s, 2s, 4s, capped at [`MAX_BACKOFF`].
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(1000u64 << attempt.min(16)).min(MAX_BACKOFF)
}

/// Classify a transport error from reqwest.
pub(crate) fn classify(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        return FailureKind::Timeout;
    }
    if err.is_connect() {
        return FailureKind::Connection;
    }
    classify_chain(err)
}

/// Walk the source chain looking for transient I/O errors, then fall back
/// to message matching for wrapped errors (hyper, h2) that do not expose
/// the underlying `std::io::Error` directly.
fn classify_chain(err: &(dyn std::error::Error + 'static)) -> FailureKind {
    let mut messages = Vec::new();
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = cause {
        if let Some(io_err) = current.downcast_ref::<std::io::Error>() {
            if is_transient_io_error(io_err) {
                return FailureKind::Connection;
            }
        }
        messages.push(current.to_string());
        cause = current.source();
    }
    classify_message(&messages.join(": "))
}

fn is_transient_io_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof
    )
}

fn classify_message(message: &str) -> FailureKind {
    let message = message.to_lowercase();
    if message.contains("timed out") || message.contains("timeout") {
        return FailureKind::Timeout;
    }
    if message.contains("connection refused")
        || message.contains("connection reset")
        || message.contains("connection aborted")
        || message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("network unreachable")
        || message.contains("broken pipe")
        || message.contains("socket")
    {
        return FailureKind::Connection;
    }
    FailureKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::io;
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_secs(30),
            max_retries,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_connection_failures_with_backoff() {
        let start = Instant::now();
        let mut calls = 0u32;
        let result = run_with_retry(policy(3), "test op", "http://svc.test", || {
            calls += 1;
            let call = calls;
            async move {
                if call < 3 {
                    Err(AttemptError::Connection("connection refused".into()))
                } else {
                    Ok(call)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_url_and_attempts() {
        let start = Instant::now();
        let mut calls = 0u32;
        let err = run_with_retry::<u32, _, _>(policy(3), "test op", "http://svc.test", || {
            calls += 1;
            async { Err(AttemptError::Connection("connection refused".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 4);
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        match &err {
            IngestionError::Connection { url, attempts, .. } => {
                assert_eq!(url, "http://svc.test");
                assert_eq!(*attempts, 4);
            }
            other => panic!("expected connection error, got {other:?}"),
        }
        assert!(err.to_string().contains("after 4 attempts"));
        assert!(err.to_string().contains("http://svc.test"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_never_retried() {
        let short = RetryPolicy {
            attempt_timeout: Duration::from_secs(5),
            max_retries: 3,
        };
        let start = Instant::now();
        let mut calls = 0u32;
        let err = run_with_retry::<u32, _, _>(short, "test op", "http://svc.test", || {
            calls += 1;
            async { std::future::pending().await }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(matches!(err, IngestionError::Timeout { .. }));
        assert!(err.to_string().contains("may still be processing"));
    }

    #[tokio::test(start_paused = true)]
    async fn other_failures_pass_through_unretried() {
        let mut calls = 0u32;
        let err = run_with_retry::<u32, _, _>(policy(3), "test op", "http://svc.test", || {
            calls += 1;
            async { Err(AttemptError::Fatal(IngestionError::Config("boom".into()))) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, IngestionError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_tries_once() {
        let mut calls = 0u32;
        let err = run_with_retry::<u32, _, _>(policy(0), "test op", "http://svc.test", || {
            calls += 1;
            async { Err(AttemptError::Connection("connection refused".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls, 1);
        match err {
            IngestionError::Connection { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(2), Duration::from_secs(4));
        assert_eq!(backoff(3), Duration::from_secs(5));
        assert_eq!(backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn classifies_transient_messages_as_connection() {
        assert_eq!(
            classify_message("tcp connect error: Connection refused (os error 111)"),
            FailureKind::Connection
        );
        assert_eq!(
            classify_message("dns error: failed to lookup address information"),
            FailureKind::Connection
        );
        assert_eq!(classify_message("operation timed out"), FailureKind::Timeout);
        assert_eq!(
            classify_message("error decoding response body"),
            FailureKind::Other
        );
    }

    #[test]
    fn classifies_io_errors_in_the_source_chain() {
        #[derive(Debug)]
        struct Wrapper(io::Error);
        impl fmt::Display for Wrapper {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "request failed")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let err = Wrapper(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(classify_chain(&err), FailureKind::Connection);
    }
}
