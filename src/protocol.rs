//! Wire protocol for the sidecar's stdin/stdout channel.
//!
//! The parent process writes newline-delimited [`JobRequest`] objects to our
//! stdin and reads newline-delimited [`OutputEvent`] objects from our stdout.
//! Unknown fields are ignored on decode; missing optional fields take
//! defaults, so older front-ends keep working against newer sidecars.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One job submitted by the front-end.
///
/// Jobs are value-semantic: once dispatched to a worker they are never
/// mutated (the dispatcher fills in a default retry config before handing
/// the job off, nothing else).
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub creds: HashMap<String, String>,
    #[serde(default)]
    pub config: HashMap<String, String>,
    /// Opaque key/value context carried through from the front-end.
    #[serde(default)]
    pub context_data: HashMap<String, String>,
    #[serde(default)]
    pub http_spec: Option<HttpRequestSpec>,
    #[serde(default)]
    pub rate_limits: Option<RateLimitConfig>,
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
}

/// Data-driven description of one upload request.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpRequestSpec {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub multipart_fields: HashMap<String, MultipartField>,
    /// Reserved for form-encoded uploads; current hosts are all multipart.
    #[serde(default)]
    pub form_fields: HashMap<String, String>,
    #[serde(default)]
    pub response_parser: ResponseParserSpec,
    #[serde(default)]
    pub pre_request: Option<PreRequestSpec>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// A single multipart field in a request spec.
///
/// `file` streams the job's file, `text` writes the literal value and
/// `dynamic` resolves the value through the pre-request extraction map.
#[derive(Debug, Clone, Deserialize)]
pub struct MultipartField {
    #[serde(rename = "type")]
    pub kind: MultipartFieldKind,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultipartFieldKind {
    File,
    Text,
    Dynamic,
}

/// A chained GET/POST used to harvest dynamic values before the upload.
#[derive(Debug, Clone, Deserialize)]
pub struct PreRequestSpec {
    #[serde(default)]
    pub action: String,
    pub url: String,
    #[serde(default = "default_get")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub form_fields: HashMap<String, String>,
    /// Run this sub-session on a fresh cookie jar and hand the jar to the
    /// upload that follows.
    #[serde(default)]
    pub use_cookies: bool,
    /// Extraction name -> JSON dotted path or CSS selector.
    #[serde(default)]
    pub extract_fields: HashMap<String, String>,
    #[serde(default = "default_response_type")]
    pub response_type: String,
    #[serde(default)]
    pub follow_up_request: Option<Box<PreRequestSpec>>,
}

fn default_get() -> String {
    "GET".to_string()
}

fn default_response_type() -> String {
    "json".to_string()
}

/// How to recover `(image_url, thumb_url)` from the upload response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseParserSpec {
    /// `json` is implemented; `html`, `regex` and `direct` are reserved.
    #[serde(rename = "type", default = "default_response_type")]
    pub kind: String,
    #[serde(default)]
    pub url_path: String,
    #[serde(default)]
    pub thumb_path: String,
    #[serde(default)]
    pub status_path: String,
    #[serde(default)]
    pub success_value: String,
    /// Reserved: templates for synthesizing URLs from extracted fragments.
    #[serde(default)]
    pub url_template: String,
    #[serde(default)]
    pub thumb_template: String,
}

/// Per-service token bucket override carried on a job.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst_size: u32,
    /// Positive value replaces the global bucket's rate as well.
    #[serde(default)]
    pub global_limit: f64,
}

/// Retry policy for a job's HTTP attempts.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_retryable_codes")]
    pub retryable_http_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            retryable_http_codes: default_retryable_codes(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retryable_codes() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

/// Event kinds understood by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Log,
    Status,
    Result,
    Progress,
    Data,
    Error,
    BatchComplete,
}

/// Terminal and in-flight states of a single file upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    Uploading,
    Done,
    Failed,
    Timeout,
}

/// One line on stdout.
#[derive(Debug, Clone, Serialize)]
pub struct OutputEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "file", skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OutputEvent {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            file_path: None,
            status: None,
            url: None,
            thumb: None,
            msg: None,
            data: None,
        }
    }

    pub fn log(msg: impl Into<String>) -> Self {
        Self {
            msg: Some(msg.into()),
            ..Self::new(EventKind::Log)
        }
    }

    pub fn file_status(file: impl Into<String>, status: FileStatus) -> Self {
        let label = match status {
            FileStatus::Uploading => "Uploading",
            FileStatus::Done => "Done",
            FileStatus::Failed => "Failed",
            FileStatus::Timeout => "Timeout",
        };
        Self {
            file_path: Some(file.into()),
            status: Some(label.to_string()),
            ..Self::new(EventKind::Status)
        }
    }

    pub fn file_result(
        file: impl Into<String>,
        url: impl Into<String>,
        thumb: impl Into<String>,
    ) -> Self {
        Self {
            file_path: Some(file.into()),
            url: Some(url.into()),
            thumb: Some(thumb.into()),
            ..Self::new(EventKind::Result)
        }
    }

    pub fn op_result(success: bool, msg: impl Into<String>) -> Self {
        Self {
            status: Some(if success { "success" } else { "failed" }.to_string()),
            msg: Some(msg.into()),
            ..Self::new(EventKind::Result)
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn progress(file: impl Into<String>, payload: &ProgressPayload) -> Self {
        Self {
            file_path: Some(file.into()),
            // ProgressPayload serialization cannot fail; fall back to null
            // rather than dropping the event.
            data: Some(serde_json::to_value(payload).unwrap_or(Value::Null)),
            ..Self::new(EventKind::Progress)
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            status: Some("success".to_string()),
            ..Self::new(EventKind::Data)
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file_path = Some(file.into());
        self
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            msg: Some(msg.into()),
            ..Self::new(EventKind::Error)
        }
    }

    pub fn file_error(file: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            file_path: Some(file.into()),
            msg: Some(msg.into()),
            ..Self::new(EventKind::Error)
        }
    }

    pub fn batch_complete() -> Self {
        Self {
            status: Some("done".to_string()),
            ..Self::new(EventKind::BatchComplete)
        }
    }
}

/// Payload of a `progress` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Average bytes/sec since the first byte.
    pub speed: f64,
    pub percentage: f64,
    pub eta_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_decodes_with_defaults() {
        let job: JobRequest = serde_json::from_str(
            r#"{"action":"upload","service":"pixhost.to","files":["/tmp/a.jpg"]}"#,
        )
        .unwrap();
        assert_eq!(job.action, "upload");
        assert_eq!(job.service, "pixhost.to");
        assert_eq!(job.files, vec!["/tmp/a.jpg"]);
        assert!(job.creds.is_empty());
        assert!(job.http_spec.is_none());
        assert!(job.retry_config.is_none());
    }

    #[test]
    fn job_ignores_unknown_fields() {
        let job: JobRequest = serde_json::from_str(
            r#"{"action":"login","service":"vipr.im","future_field":{"a":1}}"#,
        )
        .unwrap();
        assert_eq!(job.action, "login");
    }

    #[test]
    fn http_spec_decodes_field_kinds() {
        let spec: HttpRequestSpec = serde_json::from_str(
            r#"{
                "url": "https://example.com/upload",
                "method": "POST",
                "multipart_fields": {
                    "img": {"type": "file", "value": ""},
                    "title": {"type": "text", "value": "hello"},
                    "token": {"type": "dynamic", "value": "csrf"}
                },
                "response_parser": {"type": "json", "url_path": "data.url"}
            }"#,
        )
        .unwrap();
        assert_eq!(spec.multipart_fields["img"].kind, MultipartFieldKind::File);
        assert_eq!(spec.multipart_fields["title"].kind, MultipartFieldKind::Text);
        assert_eq!(
            spec.multipart_fields["token"].kind,
            MultipartFieldKind::Dynamic
        );
        assert_eq!(spec.response_parser.url_path, "data.url");
    }

    #[test]
    fn pre_request_chain_decodes() {
        let spec: PreRequestSpec = serde_json::from_str(
            r#"{
                "url": "https://example.com/form",
                "response_type": "html",
                "use_cookies": true,
                "extract_fields": {"token": "input[name='_token']"},
                "follow_up_request": {"url": "https://example.com/next"}
            }"#,
        )
        .unwrap();
        assert!(spec.use_cookies);
        let follow = spec.follow_up_request.unwrap();
        assert_eq!(follow.url, "https://example.com/next");
        assert_eq!(follow.method, "GET");
        assert!(follow.follow_up_request.is_none());
    }

    #[test]
    fn retry_config_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.initial_backoff_ms, 1_000);
        assert_eq!(cfg.max_backoff_ms, 30_000);
        assert_eq!(cfg.retryable_http_codes, vec![408, 429, 500, 502, 503, 504]);
    }

    #[test]
    fn events_serialize_expected_shapes() {
        let line = serde_json::to_string(&OutputEvent::batch_complete()).unwrap();
        assert_eq!(line, r#"{"type":"batch_complete","status":"done"}"#);

        let line =
            serde_json::to_string(&OutputEvent::file_status("/tmp/a.jpg", FileStatus::Uploading))
                .unwrap();
        assert_eq!(line, r#"{"type":"status","file":"/tmp/a.jpg","status":"Uploading"}"#);

        let line = serde_json::to_string(&OutputEvent::file_result(
            "/tmp/a.jpg",
            "https://x/show",
            "https://x/th",
        ))
        .unwrap();
        assert_eq!(
            line,
            r#"{"type":"result","file":"/tmp/a.jpg","url":"https://x/show","thumb":"https://x/th"}"#
        );
    }

    #[test]
    fn progress_event_carries_payload() {
        let payload = ProgressPayload {
            bytes_transferred: 512,
            total_bytes: 1024,
            speed: 256.0,
            percentage: 50.0,
            eta_seconds: 2,
        };
        let event = OutputEvent::progress("/tmp/a.jpg", &payload);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["data"]["bytes_transferred"], 512);
        assert_eq!(value["data"]["eta_seconds"], 2);
    }
}
