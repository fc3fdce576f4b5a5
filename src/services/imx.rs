//! imx.to: API-key uploads plus a cookie-based web login for gallery
//! management.

use super::{CreatedGallery, GalleryInfo, HostAdapter, ServiceContext, UploadedImage};
use crate::client;
use crate::error::UploadError;
use crate::progress;
use crate::protocol::{JobRequest, OutputEvent};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

const SERVICE: &str = "imx.to";
const UPLOAD_URL: &str = "https://api.imx.to/v1/upload.php";
// The www host serves a bad certificate; always use the naked domain.
const LOGIN_URL: &str = "https://imx.to/login.php";
const GALLERIES_URL: &str = "https://imx.to/user/galleries";
const GALLERY_ADD_URL: &str = "https://imx.to/user/gallery/add";

/// Thumbnail edge length -> form id.
fn thumb_size_id(size: &str) -> &'static str {
    match size {
        "100" => "1",
        "150" => "6",
        "180" => "2",
        "250" => "3",
        "300" => "4",
        _ => "2",
    }
}

/// Thumbnail shape label -> form id.
fn thumb_format_id(format: &str) -> &'static str {
    match format {
        "Fixed Width" => "1",
        "Fixed Height" => "4",
        "Proportional" => "2",
        "Square" => "3",
        _ => "1",
    }
}

fn login_credentials(creds: &HashMap<String, String>) -> Option<(String, String)> {
    // Front-ends historically shared one credential pair between imx and
    // vipr; honor the fallback.
    let user = creds
        .get("imx_user")
        .filter(|u| !u.is_empty())
        .or_else(|| creds.get("vipr_user"))?
        .clone();
    let pass = creds
        .get("imx_pass")
        .filter(|p| !p.is_empty())
        .or_else(|| creds.get("vipr_pass"))?
        .clone();
    if user.is_empty() || pass.is_empty() {
        return None;
    }
    Some((user, pass))
}

fn login_succeeded(final_url: &str, body: &str) -> bool {
    let mut success = final_url.contains("dashboard")
        || final_url.contains("galleries")
        || body.to_lowercase().contains("logout")
        || body.contains("Balance");
    // The login form re-rendering trumps any incidental success marker.
    if body.contains("login_form") || body.contains("Sign Up") || body.contains("Incorrect username")
    {
        success = false;
    }
    success
}

#[derive(Debug, Deserialize)]
struct ImxUploadResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: ImxUploadData,
}

#[derive(Debug, Default, Deserialize)]
struct ImxUploadData {
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    thumbnail_url: String,
}

/// Pulls `(id, name)` pairs out of the galleries page: every anchor whose
/// href contains `/g/`, de-duplicated by id, in on-page order.
fn parse_galleries(body: &str) -> Vec<GalleryInfo> {
    let Ok(anchors) = Selector::parse("a") else {
        return Vec::new();
    };
    let Ok(label) = Selector::parse("i") else {
        return Vec::new();
    };
    let document = Html::parse_document(body);
    let mut seen = std::collections::HashSet::new();
    let mut galleries = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some((_, rest)) = href.split_once("/g/") else {
            continue;
        };
        let id = rest
            .split('?')
            .next()
            .and_then(|s| s.split('/').next())
            .unwrap_or_default()
            .to_string();
        let name = anchor
            .select(&label)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        if !id.is_empty() && !name.is_empty() && seen.insert(id.clone()) {
            galleries.push(GalleryInfo { id, name });
        }
    }
    galleries
}

/// Gallery id from a `manage?id=` link in the create-response body.
fn parse_created_gallery_id(body: &str) -> Option<String> {
    let selector = Selector::parse("a[href*='manage?id=']").ok()?;
    let document = Html::parse_document(body);
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Some(id) = query_param(href, "id") {
            return Some(id);
        }
    }
    None
}

fn query_param(href: &str, name: &str) -> Option<String> {
    // Relative hrefs are resolved against the site root just to parse the
    // query string.
    let absolute;
    let href = if href.starts_with("http") {
        href
    } else {
        absolute = format!("https://imx.to/{}", href.trim_start_matches('/'));
        &absolute
    };
    let parsed = url::Url::parse(href).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.to_string())
}

pub struct ImxAdapter;

impl ImxAdapter {
    /// Web login with persistent session tracking. Returns without network
    /// activity when a previous login already succeeded.
    async fn ensure_login(
        &self,
        ctx: &ServiceContext,
        creds: &HashMap<String, String>,
        user_agent: &str,
    ) -> Result<(), UploadError> {
        let mut state = ctx.sessions.imx.write().await;
        if state.logged_in {
            return Ok(());
        }

        let (user, pass) = login_credentials(creds).ok_or(UploadError::Auth {
            service: SERVICE,
            reason: "missing credentials".to_string(),
        })?;

        // Initial GET seeds the session cookies the POST needs.
        client::get(&ctx.http, LOGIN_URL, user_agent).await?;

        ctx.sink
            .emit(&OutputEvent::log("IMX: Starting Web Login..."));
        let response = client::post_form(
            &ctx.http,
            LOGIN_URL,
            user_agent,
            &[
                ("usr_email", user.as_str()),
                ("pwd", pass.as_str()),
                ("doLogin", "Login"),
                ("remember", "1"),
            ],
        )
        .await?;

        let final_url = response.url().to_string();
        let body = response.text().await?;
        ctx.sink.emit(&OutputEvent::log(format!(
            "IMX Login Final URL: {final_url}"
        )));

        if login_succeeded(&final_url, &body) {
            state.logged_in = true;
            ctx.sink
                .emit(&OutputEvent::log("IMX Login: Verified Success"));
            Ok(())
        } else {
            Err(UploadError::Auth {
                service: SERVICE,
                reason: format!("login not accepted, final URL: {final_url}"),
            })
        }
    }
}

#[async_trait]
impl HostAdapter for ImxAdapter {
    fn service(&self) -> &'static str {
        SERVICE
    }

    fn requires_login(&self) -> bool {
        true
    }

    async fn login(&self, ctx: &ServiceContext, job: &JobRequest) -> Result<(), UploadError> {
        let user_agent = client::user_agent_for(&job.config);
        self.ensure_login(ctx, &job.creds, &user_agent).await
    }

    /// API upload; authenticates with the `api_key` credential rather than
    /// the web session.
    async fn upload(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
        file: &str,
    ) -> Result<UploadedImage, UploadError> {
        ctx.limits.wait_for(SERVICE).await;

        let (part, _) = progress::progress_file_part(file, ctx.sink.clone()).await?;
        let size_id = thumb_size_id(job.config.get("imx_thumb_id").map_or("", |s| s.as_str()));
        let mut form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("format", "json")
            .text("adult", "1")
            .text("upload_type", "file")
            .text("simple_upload", "Upload")
            .text("thumbnail_size", size_id)
            .text("thumb_size_container", size_id)
            .text(
                "thumbnail_format",
                thumb_format_id(job.config.get("imx_format_id").map_or("", |s| s.as_str())),
            );
        if let Some(gallery_id) = job.config.get("gallery_id").filter(|g| !g.is_empty()) {
            form = form.text("gallery_id", gallery_id.clone());
        }

        let response = ctx
            .http
            .post(UPLOAD_URL)
            .header("X-API-KEY", job.creds.get("api_key").map_or("", |k| k.as_str()))
            .header(
                reqwest::header::USER_AGENT,
                client::user_agent_for(&job.config),
            )
            .multipart(form)
            .send()
            .await?;

        let body = super::read_success_body(response).await?;
        let parsed: ImxUploadResponse = serde_json::from_str(&body)?;
        if parsed.status != "success" || parsed.data.image_url.is_empty() {
            return Err(UploadError::Parse { host: SERVICE });
        }
        Ok(UploadedImage {
            url: parsed.data.image_url,
            thumb: parsed.data.thumbnail_url,
        })
    }

    async fn list_galleries(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
    ) -> Result<Vec<GalleryInfo>, UploadError> {
        let user_agent = client::user_agent_for(&job.config);
        if let Err(err) = self.ensure_login(ctx, &job.creds, &user_agent).await {
            warn!(error = %err, "imx gallery listing without login");
        }
        let response = client::get(&ctx.http, GALLERIES_URL, &user_agent).await?;
        let body = response.text().await?;
        Ok(parse_galleries(&body))
    }

    async fn create_gallery(
        &self,
        ctx: &ServiceContext,
        job: &JobRequest,
        name: &str,
    ) -> Result<CreatedGallery, UploadError> {
        let user_agent = client::user_agent_for(&job.config);
        self.ensure_login(ctx, &job.creds, &user_agent)
            .await
            .map_err(|_| UploadError::Auth {
                service: SERVICE,
                reason: "IMX login failed - check credentials".to_string(),
            })?;

        let response = ctx
            .http
            .post(GALLERY_ADD_URL)
            .header(reqwest::header::USER_AGENT, &user_agent)
            .header(reqwest::header::REFERER, GALLERY_ADD_URL)
            .form(&[("gallery_name", name), ("submit_new_gallery", "Add")])
            .send()
            .await?;

        let final_url = response.url().to_string();
        if final_url.contains("id=") {
            if let Some(id) = query_param(&final_url, "id") {
                return Ok(CreatedGallery {
                    data: serde_json::Value::String(id.clone()),
                    id,
                });
            }
        }

        let body = response.text().await?;
        if let Some(id) = parse_created_gallery_id(&body) {
            ctx.sink
                .emit(&OutputEvent::log(format!("[IMX] Found ID in body: {id}")));
            return Ok(CreatedGallery {
                data: serde_json::Value::String(id.clone()),
                id,
            });
        }

        Err(UploadError::Other(format!(
            "failed to extract gallery ID, final URL: {final_url}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumb_ids_map_with_defaults() {
        assert_eq!(thumb_size_id("100"), "1");
        assert_eq!(thumb_size_id("300"), "4");
        assert_eq!(thumb_size_id(""), "2");
        assert_eq!(thumb_size_id("999"), "2");
        assert_eq!(thumb_format_id("Square"), "3");
        assert_eq!(thumb_format_id(""), "1");
    }

    #[test]
    fn credential_fallback_to_vipr_pair() {
        let mut creds = HashMap::new();
        creds.insert("vipr_user".to_string(), "u".to_string());
        creds.insert("vipr_pass".to_string(), "p".to_string());
        assert_eq!(
            login_credentials(&creds),
            Some(("u".to_string(), "p".to_string()))
        );

        creds.insert("imx_user".to_string(), "iu".to_string());
        creds.insert("imx_pass".to_string(), "ip".to_string());
        assert_eq!(
            login_credentials(&creds),
            Some(("iu".to_string(), "ip".to_string()))
        );

        assert_eq!(login_credentials(&HashMap::new()), None);
    }

    #[test]
    fn login_markers() {
        assert!(login_succeeded("https://imx.to/user/dashboard", ""));
        assert!(login_succeeded("https://imx.to/", "... Logout ..."));
        assert!(login_succeeded("https://imx.to/", "Balance: 12"));
        // Failure markers override success markers.
        assert!(!login_succeeded(
            "https://imx.to/user/dashboard",
            "<div id='login_form'>"
        ));
        assert!(!login_succeeded("https://imx.to/login.php", "Sign Up now"));
        assert!(!login_succeeded("https://imx.to/", "Incorrect username"));
        assert!(!login_succeeded("https://imx.to/login.php", "<form></form>"));
    }

    #[test]
    fn galleries_parse_dedup_and_order() {
        let body = r#"
            <a href="/g/abc?p=1"><i>First</i></a>
            <a href="/g/abc/2"><i>First again</i></a>
            <a href="/g/def"><i> Second </i></a>
            <a href="/other"><i>Not a gallery</i></a>
            <a href="/g/ghi"></a>
        "#;
        let galleries = parse_galleries(body);
        assert_eq!(
            galleries,
            vec![
                GalleryInfo {
                    id: "abc".to_string(),
                    name: "First".to_string()
                },
                GalleryInfo {
                    id: "def".to_string(),
                    name: "Second".to_string()
                },
            ]
        );
    }

    #[test]
    fn created_gallery_id_from_body_link() {
        let body = r#"<a href="/user/gallery/manage?id=42">Manage Gallery</a>"#;
        assert_eq!(parse_created_gallery_id(body).as_deref(), Some("42"));
        assert_eq!(parse_created_gallery_id("<p>nothing</p>"), None);
    }

    #[test]
    fn query_param_handles_relative_and_absolute() {
        assert_eq!(
            query_param("https://imx.to/user/gallery/manage?id=7", "id").as_deref(),
            Some("7")
        );
        assert_eq!(
            query_param("user/gallery/manage?id=9&x=1", "id").as_deref(),
            Some("9")
        );
        assert_eq!(query_param("https://imx.to/user", "id"), None);
    }

    #[test]
    fn upload_response_parses() {
        let body = r#"{"status":"success","data":{"image_url":"https://imx.to/i/x","thumbnail_url":"https://imx.to/t/x"}}"#;
        let parsed: ImxUploadResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, "success");
        assert_eq!(parsed.data.image_url, "https://imx.to/i/x");
    }
}
