//! vipr.im: XFileSharing-style host. Login captures a session id and the
//! dynamically issued upload CGI endpoint from the landing page; the upload
//! result is an HTML page (sometimes behind one more form round-trip) with
//! the URLs in hidden inputs.

use super::{CreatedGallery, GalleryInfo, HostAdapter, ServiceContext, UploadedImage};
use crate::client;
use crate::error::UploadError;
use crate::extract;
use crate::progress;
use crate::protocol::JobRequest;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

const SERVICE: &str = "vipr.im";
const LOGIN_URL: &str = "https://vipr.im/login.html";
const HOME_URL: &str = "https://vipr.im/";
const DEFAULT_UPLOAD_URL: &str = "https://vipr.im/cgi-bin/upload.cgi";

lazy_static! {
    static ref SESS_ID_INPUT: Regex =
        Regex::new(r#"name=["']sess_id["']\s+value=["']([^"']+)["']"#).expect("valid regex");
    static ref UPLOAD_ACTION: Regex =
        Regex::new(r#"action=["'](https?://[^/]+/cgi-bin/upload\.cgi)"#).expect("valid regex");
    static ref IMAGE_URL_VALUE: Regex =
        Regex::new(r#"value=['"](https?://vipr\.im/i/[^'"]+)['"]"#).expect("valid regex");
    static ref THUMB_URL_SRC: Regex =
        Regex::new(r#"src=['"](https?://vipr\.im/th/[^'"]+)['"]"#).expect("valid regex");
}

/// Session material scraped from the landing page after login.
fn parse_session(body: &str) -> (String, String) {
    let mut endpoint =
        extract::select_attr(body, "form[action*='upload.cgi']", "action").unwrap_or_default();
    let mut sess_id =
        extract::select_attr(body, "input[name='sess_id']", "value").unwrap_or_default();
    // Some skins inline the form in script fragments the DOM pass misses.
    if sess_id.is_empty() {
        if let Some(caps) = SESS_ID_INPUT.captures(body) {
            sess_id = caps[1].to_string();
        }
        if endpoint.is_empty() {
            if let Some(caps) = UPLOAD_ACTION.captures(body) {
                endpoint = caps[1].to_string();
            }
        }
    }
    (endpoint, sess_id)
}

/// The upload result page sometimes carries an intermediate `fn` form that
/// must be posted back before the final page renders.
fn parse_result_handle(body: &str) -> Option<String> {
    let value = extract::select_text(body, "textarea[name='fn']")?;
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_upload_result(body: &str) -> Option<UploadedImage> {
    let mut url =
        extract::select_attr(body, "input[name='link_url']", "value").unwrap_or_default();
    let mut thumb =
        extract::select_attr(body, "input[name='thumb_url']", "value").unwrap_or_default();
    if url.is_empty() || thumb.is_empty() {
        if let Some(caps) = IMAGE_URL_VALUE.captures(body) {
            url = caps[1].to_string();
        }
        if let Some(caps) = THUMB_URL_SRC.captures(body) {
            thumb = caps[1].to_string();
        }
    }
    if url.is_empty() || thumb.is_empty() {
        None
    } else {
        Some(UploadedImage { url, thumb })
    }
}

/// Folder listing: anchors carrying a `fld_id` query parameter.
fn parse_galleries(body: &str) -> Vec<GalleryInfo> {
    let Ok(selector) = Selector::parse("a[href*='fld_id=']") else {
        return Vec::new();
    };
    let document = Html::parse_document(body);
    let mut seen = std::collections::HashSet::new();
    let mut galleries = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(id) = fld_id_of(href) else {
            continue;
        };
        let name = anchor.text().collect::<String>().trim().to_string();
        if !id.is_empty() && !name.is_empty() && seen.insert(id.clone()) {
            galleries.push(GalleryInfo { id, name });
        }
    }
    galleries
}

fn fld_id_of(href: &str) -> Option<String> {
    let absolute;
    let href = if href.starts_with("http") {
        href
    } else if href.starts_with('?') {
        absolute = format!("https://vipr.im/{href}");
        &absolute
    } else {
        absolute = format!("https://vipr.im/{}", href.trim_start_matches('/'));
        &absolute
    };
    let parsed = url::Url::parse(href).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "fld_id")
        .map(|(_, v)| v.to_string())
}

pub struct ViprAdapter;

impl ViprAdapter {
    async fn ensure_login(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
    ) -> Result<(), UploadError> {
        let mut state = ctx.sessions.vipr.write().await;
        if !state.sess_id.is_empty() {
            return Ok(());
        }

        let user_agent = client::user_agent_for(&job.config);
        let user = job.creds.get("vipr_user").cloned().unwrap_or_default();
        let pass = job.creds.get("vipr_pass").cloned().unwrap_or_default();

        // Login sets the cookie; the landing page carries the session form.
        client::post_form(
            &ctx.http,
            LOGIN_URL,
            &user_agent,
            &[
                ("op", "login"),
                ("login", user.as_str()),
                ("password", pass.as_str()),
            ],
        )
        .await?;

        let response = client::get(&ctx.http, HOME_URL, &user_agent).await?;
        let body = response.text().await?;
        let (endpoint, sess_id) = parse_session(&body);
        state.endpoint = endpoint;
        state.sess_id = sess_id;

        if state.sess_id.is_empty() {
            Err(UploadError::Auth {
                service: SERVICE,
                reason: "no session id on landing page".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HostAdapter for ViprAdapter {
    fn service(&self) -> &'static str {
        SERVICE
    }

    fn requires_login(&self) -> bool {
        true
    }

    async fn login(&self, ctx: &ServiceContext, job: &JobRequest) -> Result<(), UploadError> {
        self.ensure_login(ctx, job).await
    }

    async fn upload(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
        file: &str,
    ) -> Result<UploadedImage, UploadError> {
        ctx.limits.wait_for(SERVICE).await;
        let user_agent = client::user_agent_for(&job.config);

        let (mut endpoint, mut sess_id) = {
            let state = ctx.sessions.vipr.read().await;
            (state.endpoint.clone(), state.sess_id.clone())
        };
        if sess_id.is_empty() {
            self.ensure_login(ctx, job).await?;
            let state = ctx.sessions.vipr.read().await;
            endpoint = state.endpoint.clone();
            sess_id = state.sess_id.clone();
        }
        if endpoint.is_empty() {
            endpoint = DEFAULT_UPLOAD_URL.to_string();
        }

        // The CGI rejects filenames with spaces.
        let safe_name = progress::file_basename(file).replace(' ', "_");
        let (part, _) =
            progress::progress_file_part_named(file, safe_name, ctx.sink.clone()).await?;
        let form = reqwest::multipart::Form::new()
            .part("file_0", part)
            .text("upload_type", "file")
            .text("sess_id", sess_id)
            .text(
                "thumb_size",
                job.config.get("vipr_thumb").cloned().unwrap_or_default(),
            )
            .text(
                "fld_id",
                job.config.get("vipr_gal_id").cloned().unwrap_or_default(),
            )
            .text("tos", "1")
            .text("submit_btn", "Upload");

        let upload_url = format!(
            "{endpoint}?upload_id={}&js_on=1&utype=reg&upload_type=file",
            client::random_token(12)
        );
        let response = ctx
            .http
            .post(&upload_url)
            .header(reqwest::header::USER_AGENT, &user_agent)
            .header(reqwest::header::REFERER, HOME_URL)
            .multipart(form)
            .send()
            .await?;
        let mut body = super::read_success_body(response).await?;

        if let Some(handle) = parse_result_handle(&body) {
            let follow_up = client::post_form(
                &ctx.http,
                HOME_URL,
                &user_agent,
                &[("op", "upload_result"), ("fn", handle.as_str()), ("st", "OK")],
            )
            .await?;
            body = follow_up.text().await?;
        }

        parse_upload_result(&body).ok_or(UploadError::Parse { host: SERVICE })
    }

    async fn list_galleries(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
    ) -> Result<Vec<GalleryInfo>, UploadError> {
        {
            let state = ctx.sessions.vipr.read().await;
            if state.sess_id.is_empty() {
                drop(state);
                if let Err(err) = self.ensure_login(ctx, job).await {
                    tracing::warn!(error = %err, "vipr gallery listing without login");
                }
            }
        }
        let user_agent = client::user_agent_for(&job.config);
        let response = client::get(
            &ctx.http,
            &format!("{HOME_URL}?op=my_files"),
            &user_agent,
        )
        .await?;
        let body = response.text().await?;
        Ok(parse_galleries(&body))
    }

    /// Folders are created by a simple GET; the host does not return the
    /// new id, so the caller re-lists galleries to find it.
    async fn create_gallery(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
        name: &str,
    ) -> Result<CreatedGallery, UploadError> {
        let user_agent = client::user_agent_for(&job.config);
        let request = ctx
            .http
            .get(HOME_URL)
            .query(&[("op", "my_files"), ("add_folder", name)])
            .header(reqwest::header::USER_AGENT, &user_agent)
            .header(reqwest::header::REFERER, HOME_URL);
        request.send().await?;
        Ok(CreatedGallery {
            id: "0".to_string(),
            data: Value::String("0".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_parses_from_dom() {
        let body = r#"
            <form action="https://s1.vipr.im/cgi-bin/upload.cgi" method="post">
                <input name="sess_id" value="abc123">
            </form>
        "#;
        let (endpoint, sess_id) = parse_session(body);
        assert_eq!(endpoint, "https://s1.vipr.im/cgi-bin/upload.cgi");
        assert_eq!(sess_id, "abc123");
    }

    #[test]
    fn session_parses_from_regex_fallback() {
        let body = r#"
            <script>form = '<form action="https://s2.vipr.im/cgi-bin/upload.cgi">' +
              '<input type="hidden" name="sess_id" value="zzz9">'</script>
        "#;
        let (endpoint, sess_id) = parse_session(body);
        assert_eq!(endpoint, "https://s2.vipr.im/cgi-bin/upload.cgi");
        assert_eq!(sess_id, "zzz9");
    }

    #[test]
    fn missing_session_yields_empty() {
        let (endpoint, sess_id) = parse_session("<html><body>login please</body></html>");
        assert!(endpoint.is_empty());
        assert!(sess_id.is_empty());
    }

    #[test]
    fn result_handle_detected() {
        let body = r#"<textarea name="fn">file-handle-1</textarea>"#;
        assert_eq!(parse_result_handle(body).as_deref(), Some("file-handle-1"));
        assert_eq!(parse_result_handle("<p>no form</p>"), None);
    }

    #[test]
    fn upload_result_from_inputs() {
        let body = r#"
            <input name="link_url" value="https://vipr.im/i/abcd.html">
            <input name="thumb_url" value="https://vipr.im/th/00/abcd.jpg">
        "#;
        let image = parse_upload_result(body).unwrap();
        assert_eq!(image.url, "https://vipr.im/i/abcd.html");
        assert_eq!(image.thumb, "https://vipr.im/th/00/abcd.jpg");
    }

    #[test]
    fn upload_result_from_regex_fallback() {
        let body = r#"
            <script>codes = 'value="https://vipr.im/i/xy12.html"' +
              '<img src="https://vipr.im/th/00/xy12.jpg">'</script>
        "#;
        let image = parse_upload_result(body).unwrap();
        assert_eq!(image.url, "https://vipr.im/i/xy12.html");
        assert_eq!(image.thumb, "https://vipr.im/th/00/xy12.jpg");
    }

    #[test]
    fn upload_result_requires_both_urls() {
        let body = r#"<input name="link_url" value="https://vipr.im/i/only.html">"#;
        assert!(parse_upload_result(body).is_none());
    }

    #[test]
    fn galleries_parse_dedup_and_order() {
        let body = r#"
            <a href="?op=my_files&fld_id=10"> Holiday </a>
            <a href="?op=my_files&fld_id=10">Holiday dup</a>
            <a href="https://vipr.im/?op=my_files&fld_id=22">Pets</a>
            <a href="?op=my_files">All files</a>
        "#;
        let galleries = parse_galleries(body);
        assert_eq!(
            galleries,
            vec![
                GalleryInfo {
                    id: "10".to_string(),
                    name: "Holiday".to_string()
                },
                GalleryInfo {
                    id: "22".to_string(),
                    name: "Pets".to_string()
                },
            ]
        );
    }
}
