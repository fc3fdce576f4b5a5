//! Job sanitization performed before any network activity.

use crate::protocol::JobRequest;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use thiserror::Error;

/// Hard cap on individual upload size.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Closed set of actions the sidecar executes.
pub const ALLOWED_ACTIONS: &[&str] = &[
    "upload",
    "http_upload",
    "login",
    "verify",
    "list_galleries",
    "create_gallery",
    "finalize_gallery",
    "generate_thumb",
    "viper_login",
    "viper_post",
];

lazy_static! {
    static ref SERVICE_NAME: Regex = Regex::new(r"^[a-zA-Z0-9.\-]+$").expect("valid regex");
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("invalid service: {0}")]
    InvalidService(String),
    #[error("service name cannot be empty")]
    EmptyService,
    #[error("no files provided")]
    NoFiles,
    #[error("file path cannot be empty")]
    EmptyPath,
    #[error("path traversal detected: {0}")]
    PathTraversal(String),
    #[error("cannot access file: {0}")]
    Inaccessible(String),
    #[error("not a regular file: {0}")]
    NotRegularFile(String),
    #[error("file too large: {0}")]
    TooLarge(String),
}

pub fn validate_job(job: &JobRequest) -> Result<(), ValidationError> {
    if !ALLOWED_ACTIONS.contains(&job.action.as_str()) {
        return Err(ValidationError::InvalidAction(job.action.clone()));
    }

    if job.action != "generate_thumb" {
        validate_service_name(&job.service)?;
    }

    if matches!(job.action.as_str(), "upload" | "http_upload" | "generate_thumb") {
        if job.files.is_empty() {
            return Err(ValidationError::NoFiles);
        }
        for path in &job.files {
            validate_file_path(path)?;
        }
    }

    Ok(())
}

pub fn validate_service_name(service: &str) -> Result<(), ValidationError> {
    if service.is_empty() {
        return Err(ValidationError::EmptyService);
    }
    if !SERVICE_NAME.is_match(service) {
        return Err(ValidationError::InvalidService(service.to_string()));
    }
    Ok(())
}

pub fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    // Reject any `..` before touching the filesystem.
    if path.contains("..") {
        return Err(ValidationError::PathTraversal(path.to_string()));
    }

    let meta = std::fs::metadata(Path::new(path))
        .map_err(|_| ValidationError::Inaccessible(path.to_string()))?;
    if !meta.is_file() {
        return Err(ValidationError::NotRegularFile(path.to_string()));
    }
    if meta.len() > MAX_FILE_SIZE {
        return Err(ValidationError::TooLarge(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn job(action: &str, service: &str, files: Vec<String>) -> JobRequest {
        JobRequest {
            action: action.to_string(),
            service: service.to_string(),
            files,
            creds: HashMap::new(),
            config: HashMap::new(),
            context_data: HashMap::new(),
            http_spec: None,
            rate_limits: None,
            retry_config: None,
        }
    }

    #[test]
    fn rejects_unknown_action() {
        let err = validate_job(&job("explode", "pixhost.to", vec![])).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAction(_)));
    }

    #[test]
    fn rejects_bad_service_names() {
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("pix host").is_err());
        assert!(validate_service_name("host/../etc").is_err());
        assert!(validate_service_name("pixhost.to").is_ok());
        assert!(validate_service_name("turboimagehost").is_ok());
    }

    #[test]
    fn generate_thumb_allows_empty_service() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"png").unwrap();
        let path = tmp.path().to_string_lossy().to_string();
        assert!(validate_job(&job("generate_thumb", "", vec![path])).is_ok());
    }

    #[test]
    fn rejects_traversal_paths() {
        let err = validate_file_path("../etc/passwd").unwrap_err();
        assert!(matches!(err, ValidationError::PathTraversal(_)));
        let err = validate_file_path("/tmp/../../secret").unwrap_err();
        assert!(matches!(err, ValidationError::PathTraversal(_)));
    }

    #[test]
    fn rejects_empty_and_missing_paths() {
        assert!(matches!(
            validate_file_path("").unwrap_err(),
            ValidationError::EmptyPath
        ));
        assert!(matches!(
            validate_file_path("/definitely/not/here.jpg").unwrap_err(),
            ValidationError::Inaccessible(_)
        ));
    }

    #[test]
    fn rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_file_path(&dir.path().to_string_lossy()).unwrap_err();
        assert!(matches!(err, ValidationError::NotRegularFile(_)));
    }

    #[test]
    fn accepts_regular_file_under_limit() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 4096]).unwrap();
        assert!(validate_file_path(&tmp.path().to_string_lossy()).is_ok());
    }

    #[test]
    fn upload_requires_files() {
        let err = validate_job(&job("upload", "pixhost.to", vec![])).unwrap_err();
        assert!(matches!(err, ValidationError::NoFiles));
    }
}
