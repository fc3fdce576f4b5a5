//! Upload pipeline errors.

use thiserror::Error;

/// Failure of a single upload attempt or service operation.
///
/// Where the HTTP response was actually observed the status code is carried
/// structurally ([`UploadError::Status`]); the retry engine only falls back
/// to scraping status codes out of message text for opaque transport errors.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned status code {status}: {message}")]
    Status { status: u16, message: String },

    #[error("{service} login failed: {reason}")]
    Auth {
        service: &'static str,
        reason: String,
    },

    #[error("could not recover upload URL from {host} response")]
    Parse { host: &'static str },

    #[error("unsupported response parser: {0}")]
    UnsupportedParser(String),

    #[error("pre-request chain exceeds depth limit")]
    PreRequestDepth,

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response body: {0}")]
    Body(#[from] serde_json::Error),

    #[error("max retries ({retries}) exhausted, last error: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: Box<UploadError>,
    },

    #[error("{0}")]
    Other(String),
}

impl UploadError {
    /// The HTTP status observed for this failure, when one was captured.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            UploadError::Status { status, .. } => Some(*status),
            UploadError::Request(err) => err.status().map(|s| s.as_u16()),
            UploadError::RetriesExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// Whether the underlying transport reported a timeout or connect
    /// failure, independent of message wording.
    pub fn is_transport_transient(&self) -> bool {
        match self {
            UploadError::Request(err) => err.is_timeout() || err.is_connect(),
            UploadError::RetriesExhausted { source, .. } => source.is_transport_transient(),
            _ => false,
        }
    }
}
