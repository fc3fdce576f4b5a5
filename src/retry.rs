//! Retry loop with error classification and jittered exponential backoff.

use crate::error::UploadError;
use crate::events::EventSink;
use crate::protocol::{OutputEvent, RetryConfig};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use rand::Rng;
use regex::Regex;
use std::future::Future;
use std::time::Duration;
use tracing::info;

/// Message fragments that mark an error as transient regardless of status.
const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "temporary failure",
    "no such host",
    "network is unreachable",
    "broken pipe",
    "i/o timeout",
    "tls handshake timeout",
    "dial tcp",
    "eof",
];

lazy_static! {
    static ref STATUS_CODE_LABELLED: Regex =
        Regex::new(r"(?i)status code[:\s]*([0-9]{3})").expect("valid regex");
    static ref HTTP_LABELLED: Regex = Regex::new(r"(?i)http\s+([0-9]{3})").expect("valid regex");
    static ref BARE_ERROR_CODE: Regex = Regex::new(r"\b([45]\d{2})\b").expect("valid regex");
}

/// Best-effort status code recovery from an opaque error message.
///
/// Tries, in order: a "status code NNN" label, an "http NNN" label, then the
/// first word-bounded 4xx/5xx number. Returns 0 when nothing matches.
pub fn extract_status_code(message: &str) -> u16 {
    for pattern in [&*STATUS_CODE_LABELLED, &*HTTP_LABELLED, &*BARE_ERROR_CODE] {
        if let Some(caps) = pattern.captures(message) {
            if let Ok(code) = caps[1].parse() {
                return code;
            }
        }
    }
    0
}

/// Classifies an error for the retry loop.
pub fn is_retryable(err: &UploadError, status: u16, config: &RetryConfig) -> bool {
    if config.retryable_http_codes.contains(&status) {
        return true;
    }
    if err.is_transport_transient() {
        return true;
    }
    let message = err.to_string().to_lowercase();
    RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// Backoff before retry attempt `attempt` (1-indexed), jittered.
///
/// Jitter is drawn from the OS entropy source: with many synchronized
/// clients a predictable jitter would re-align retries into bursts.
pub fn backoff_for_attempt(attempt: u32, config: &RetryConfig) -> Duration {
    let base = (config.initial_backoff_ms as f64)
        * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64);
    let jitter: f64 = OsRng.gen_range(0.8..=1.2);
    Duration::from_millis((capped * jitter) as u64)
}

/// Runs `operation` up to `max_retries + 1` times.
///
/// Non-retryable failures return immediately. Retryable failures sleep the
/// jittered backoff between attempts; the caller's deadline cancels the
/// sleep by dropping this future. A success after at least one retry is
/// reported through both the event stream and the stderr log.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    sink: &EventSink,
    file: &str,
    mut operation: F,
) -> Result<T, UploadError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
{
    let mut last_err: Option<UploadError> = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(file, attempt = attempt + 1, "request succeeded after retry");
                    sink.emit(&OutputEvent::log(format!(
                        "Request succeeded after retry (attempt {})",
                        attempt + 1
                    )));
                }
                return Ok(value);
            }
            Err(err) => {
                let status = err
                    .status_code()
                    .unwrap_or_else(|| extract_status_code(&err.to_string()));
                if !is_retryable(&err, status, config) {
                    return Err(err);
                }
                if attempt >= config.max_retries {
                    last_err = Some(err);
                    break;
                }
                let backoff = backoff_for_attempt(attempt + 1, config);
                info!(
                    file,
                    attempt = attempt + 1,
                    backoff_secs = backoff.as_secs_f64(),
                    error = %err,
                    "request failed, retrying"
                );
                last_err = Some(err);
                tokio::time::sleep(backoff).await;
            }
        }
    }

    Err(UploadError::RetriesExhausted {
        retries: config.max_retries,
        source: Box::new(last_err.unwrap_or_else(|| UploadError::Other("unknown".into()))),
    })
}
