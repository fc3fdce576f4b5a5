//! Data-driven uploads: executes an [`HttpRequestSpec`] carried on the job,
//! so new hosts can be added without new code paths in the pipeline.

use crate::client;
use crate::error::UploadError;
use crate::extract;
use crate::prerequest;
use crate::progress;
use crate::protocol::{HttpRequestSpec, JobRequest, MultipartFieldKind, ResponseParserSpec};
use crate::services::{ServiceContext, UploadedImage};
use tracing::debug;

/// Uploads one file according to the job's request spec.
pub async fn execute(
    ctx: &ServiceContext,
    job: &JobRequest,
    spec: &HttpRequestSpec,
    file: &str,
) -> Result<UploadedImage, UploadError> {
    if !job.service.is_empty() {
        ctx.limits.wait_for(&job.service).await;
    }
    let user_agent = client::user_agent_for(&job.config);

    let outcome = match &spec.pre_request {
        Some(pre) => Some(prerequest::execute(&ctx.http, pre, &user_agent).await?),
        None => None,
    };
    let (extracted, session_client) = match outcome {
        Some(outcome) => (outcome.extracted, outcome.session_client),
        None => (Default::default(), None),
    };

    let mut form = reqwest::multipart::Form::new();
    for (name, field) in &spec.multipart_fields {
        match field.kind {
            MultipartFieldKind::File => {
                let (part, _) = progress::progress_file_part(file, ctx.sink.clone()).await?;
                form = form.part(name.clone(), part);
            }
            MultipartFieldKind::Text => {
                form = form.text(name.clone(), field.value.clone());
            }
            MultipartFieldKind::Dynamic => {
                // A missing extraction omits the field, matching what the
                // upstream form would see from a browser without it.
                if let Some(value) = extracted.get(&field.value) {
                    form = form.text(name.clone(), value.clone());
                }
            }
        }
    }

    let method = reqwest::Method::from_bytes(spec.method.as_bytes())
        .unwrap_or(reqwest::Method::POST);
    let http = session_client.as_ref().unwrap_or(&ctx.http);
    let mut request = http
        .request(method, &spec.url)
        .header(reqwest::header::USER_AGENT, &user_agent);
    for (name, value) in &spec.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.multipart(form).send().await?;
    let body = crate::services::read_success_body(response).await?;
    debug!(url = %spec.url, file, "spec upload completed");

    parse_response(&body, &spec.response_parser)
}

/// Recovers `(image_url, thumb_url)` per the parser spec.
///
/// Only the `json` parser is live; `html`, `regex` and `direct` are
/// reserved for future hosts and rejected until a concrete format exists.
pub fn parse_response(
    body: &str,
    parser: &ResponseParserSpec,
) -> Result<UploadedImage, UploadError> {
    match parser.kind.as_str() {
        "json" => {
            let data: serde_json::Value = serde_json::from_str(body)?;
            if !parser.status_path.is_empty()
                && extract::json_value_at(&data, &parser.status_path) != parser.success_value
            {
                return Err(UploadError::Other("upload failed status".to_string()));
            }
            Ok(UploadedImage {
                url: extract::json_value_at(&data, &parser.url_path),
                thumb: extract::json_value_at(&data, &parser.thumb_path),
            })
        }
        other => Err(UploadError::UnsupportedParser(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(kind: &str, status_path: &str, success: &str) -> ResponseParserSpec {
        ResponseParserSpec {
            kind: kind.to_string(),
            url_path: "data.image_url".to_string(),
            thumb_path: "data.thumbnail_url".to_string(),
            status_path: status_path.to_string(),
            success_value: success.to_string(),
            url_template: String::new(),
            thumb_template: String::new(),
        }
    }

    #[test]
    fn json_parser_extracts_urls() {
        let body = r#"{"status":"success","data":{"image_url":"https://x/i.jpg","thumbnail_url":"https://x/t.jpg"}}"#;
        let image = parse_response(body, &parser("json", "status", "success")).unwrap();
        assert_eq!(image.url, "https://x/i.jpg");
        assert_eq!(image.thumb, "https://x/t.jpg");
    }

    #[test]
    fn json_parser_enforces_success_value() {
        let body = r#"{"status":"error","data":{}}"#;
        let err = parse_response(body, &parser("json", "status", "success")).unwrap_err();
        assert!(err.to_string().contains("upload failed status"));
    }

    #[test]
    fn json_parser_skips_status_check_without_path() {
        let body = r#"{"data":{"image_url":"https://x/i.jpg","thumbnail_url":""}}"#;
        let image = parse_response(body, &parser("json", "", "")).unwrap();
        assert_eq!(image.url, "https://x/i.jpg");
        assert_eq!(image.thumb, "");
    }

    #[test]
    fn reserved_parsers_are_rejected() {
        for kind in ["html", "regex", "direct", "yaml"] {
            let err = parse_response("{}", &parser(kind, "", "")).unwrap_err();
            assert!(matches!(err, UploadError::UnsupportedParser(_)));
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_response("<html>oops</html>", &parser("json", "", "")).is_err());
    }
}
