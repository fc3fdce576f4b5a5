//! turboimagehost: fine-uploader style endpoint discovered from the landing
//! page, JSON response pointing at an HTML page with the BBCode link pair.

use super::{HostAdapter, ServiceContext, UploadedImage};
use crate::client;
use crate::error::UploadError;
use crate::progress;
use crate::protocol::JobRequest;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

const SERVICE: &str = "turboimagehost";
const LOGIN_URL: &str = "https://www.turboimagehost.com/login";
const HOME_URL: &str = "https://www.turboimagehost.com/";
const DEFAULT_UPLOAD_URL: &str = "https://www.turboimagehost.com/upload_html5.tu";

lazy_static! {
    static ref UPLOAD_ENDPOINT: Regex = Regex::new(r"endpoint:\s*'([^']+)'").expect("valid regex");
    static ref BBCODE_PAIR: Regex = Regex::new(
        r#"(?i)\[url=["']?(https?://[^"'\]]+)["']?\]\s*\[img\](https?://[^\[]+)\[/img\]\s*\[/url\]"#
    )
    .expect("valid regex");
}

fn parse_endpoint(body: &str) -> Option<String> {
    UPLOAD_ENDPOINT.captures(body).map(|caps| caps[1].to_string())
}

/// `[url=page][img]thumb[/img][/url]` pair from the image page.
fn parse_bbcode(body: &str) -> Option<(String, String)> {
    BBCODE_PAIR
        .captures(body)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

#[derive(Debug, Deserialize)]
struct TurboUploadResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "newUrl", default)]
    new_url: String,
    #[serde(default)]
    id: String,
}

pub struct TurboAdapter;

impl TurboAdapter {
    /// Login is optional (anonymous uploads work); the point of this call
    /// is discovering the account-specific upload endpoint.
    async fn ensure_endpoint(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
    ) -> Result<(), UploadError> {
        let mut state = ctx.sessions.turbo.write().await;
        if !state.endpoint.is_empty() {
            return Ok(());
        }

        let user_agent = client::user_agent_for(&job.config);
        if let Some(user) = job.creds.get("turbo_user").filter(|u| !u.is_empty()) {
            let pass = job.creds.get("turbo_pass").cloned().unwrap_or_default();
            client::post_form(
                &ctx.http,
                LOGIN_URL,
                &user_agent,
                &[
                    ("username", user.as_str()),
                    ("password", pass.as_str()),
                    ("login", "Login"),
                ],
            )
            .await?;
        }

        let response = client::get(&ctx.http, HOME_URL, &user_agent).await?;
        let body = response.text().await?;
        match parse_endpoint(&body) {
            Some(endpoint) => {
                state.endpoint = endpoint;
                Ok(())
            }
            None => Err(UploadError::Auth {
                service: SERVICE,
                reason: "upload endpoint not found on landing page".to_string(),
            }),
        }
    }

    async fn scrape_image_page(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
        page_url: &str,
    ) -> (String, String) {
        let user_agent = client::user_agent_for(&job.config);
        let Ok(response) = client::get(&ctx.http, page_url, &user_agent).await else {
            return (page_url.to_string(), page_url.to_string());
        };
        let Ok(body) = response.text().await else {
            return (page_url.to_string(), page_url.to_string());
        };
        // The page URL itself is still a usable result if the BBCode block
        // is missing.
        parse_bbcode(&body).unwrap_or((page_url.to_string(), page_url.to_string()))
    }
}

#[async_trait]
impl HostAdapter for TurboAdapter {
    fn service(&self) -> &'static str {
        SERVICE
    }

    fn requires_login(&self) -> bool {
        true
    }

    async fn login(&self, ctx: &ServiceContext, job: &JobRequest) -> Result<(), UploadError> {
        self.ensure_endpoint(ctx, job).await
    }

    async fn upload(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
        file: &str,
    ) -> Result<UploadedImage, UploadError> {
        ctx.limits.wait_for(SERVICE).await;
        let user_agent = client::user_agent_for(&job.config);

        // Missing endpoint falls back to the anonymous one.
        if ctx.sessions.turbo.read().await.endpoint.is_empty() {
            let _ = self.ensure_endpoint(ctx, job).await;
        }
        let endpoint = {
            let state = ctx.sessions.turbo.read().await;
            if state.endpoint.is_empty() {
                DEFAULT_UPLOAD_URL.to_string()
            } else {
                state.endpoint.clone()
            }
        };

        let file_name = progress::file_basename(file);
        let (part, total) = progress::progress_file_part(file, ctx.sink.clone()).await?;
        let part = part.mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new()
            .part("qqfile", part)
            .text("qquuid", client::random_token(32))
            .text("qqfilename", file_name.clone())
            .text("qqtotalfilesize", total.to_string())
            .text(
                "imcontent",
                job.config.get("turbo_content").cloned().unwrap_or_default(),
            )
            .text(
                "thumb_size",
                job.config.get("turbo_thumb").cloned().unwrap_or_default(),
            );

        let response = ctx
            .http
            .post(&endpoint)
            .header(reqwest::header::USER_AGENT, &user_agent)
            .header(reqwest::header::REFERER, HOME_URL)
            .multipart(form)
            .send()
            .await?;
        let body = super::read_success_body(response).await?;

        let parsed: TurboUploadResponse = serde_json::from_str(&body)?;
        if parsed.success {
            if !parsed.new_url.is_empty() {
                let (url, thumb) = self.scrape_image_page(ctx, job, &parsed.new_url).await;
                return Ok(UploadedImage { url, thumb });
            }
            if !parsed.id.is_empty() {
                let url = format!("https://www.turboimagehost.com/p/{}/{}.html", parsed.id, file_name);
                return Ok(UploadedImage {
                    thumb: url.clone(),
                    url,
                });
            }
        }
        Err(UploadError::Parse { host: SERVICE })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scraped_from_script() {
        let body = r#"
            <script>
              var uploader = new qq.FineUploader({
                request: { endpoint: 'https://s7.turboimagehost.com/upload_html5.tu' },
              });
            </script>
        "#;
        assert_eq!(
            parse_endpoint(body).as_deref(),
            Some("https://s7.turboimagehost.com/upload_html5.tu")
        );
        assert_eq!(parse_endpoint("<html></html>"), None);
    }

    #[test]
    fn bbcode_pair_extracted() {
        let body = r#"
            <textarea>[URL=https://www.turboimagehost.com/p/1/x.html][IMG]https://s7d.turboimg.net/t/1_x.jpg[/IMG][/URL]</textarea>
        "#;
        let (url, thumb) = parse_bbcode(body).unwrap();
        assert_eq!(url, "https://www.turboimagehost.com/p/1/x.html");
        assert_eq!(thumb, "https://s7d.turboimg.net/t/1_x.jpg");
    }

    #[test]
    fn bbcode_missing_yields_none() {
        assert!(parse_bbcode("<p>plain page</p>").is_none());
    }

    #[test]
    fn upload_response_variants() {
        let parsed: TurboUploadResponse =
            serde_json::from_str(r#"{"success":true,"newUrl":"https://x/p"}"#).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.new_url, "https://x/p");

        let parsed: TurboUploadResponse =
            serde_json::from_str(r#"{"success":true,"id":"99"}"#).unwrap();
        assert!(parsed.new_url.is_empty());
        assert_eq!(parsed.id, "99");

        let parsed: TurboUploadResponse = serde_json::from_str(r#"{"error":"x"}"#).unwrap();
        assert!(!parsed.success);
    }
}
