//! Shared HTTP client construction and site-aware request helpers.

use rand::rngs::OsRng;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response};
use std::collections::HashMap;
use std::time::Duration;

/// Browser-like agent; several hosts reject obvious bot agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Per-file upload deadline; also the shared client's request timeout.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout for short-lived pre-request sessions.
pub const PRE_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Job config may override the agent string.
pub fn user_agent_for(config: &HashMap<String, String>) -> String {
    match config.get("user_agent") {
        Some(ua) if !ua.is_empty() => ua.clone(),
        _ => DEFAULT_USER_AGENT.to_string(),
    }
}

/// Process-wide client: one cookie jar shared by all per-process sessions.
pub fn build_shared_client() -> reqwest::Result<Client> {
    Client::builder()
        .timeout(CLIENT_TIMEOUT)
        .cookie_store(true)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}

/// Short-lived client with a private cookie jar for pre-request sessions.
pub fn build_private_client() -> reqwest::Result<Client> {
    Client::builder()
        .timeout(PRE_REQUEST_TIMEOUT)
        .cookie_store(true)
        .pool_max_idle_per_host(10)
        .build()
}

/// Hosts that validate the Referer header on logins and uploads.
pub fn referer_for(url: &str) -> Option<&'static str> {
    if url.contains("imagebam.com") {
        Some("https://www.imagebam.com/")
    } else if url.contains("vipr.im") {
        Some("https://vipr.im/")
    } else if url.contains("turboimagehost.com") {
        Some("https://www.turboimagehost.com/")
    } else if url.contains("imx.to") {
        Some("https://imx.to/")
    } else if url.contains("vipergirls.to") {
        Some("https://vipergirls.to/forum.php")
    } else {
        None
    }
}

fn with_site_headers(builder: RequestBuilder, url: &str, user_agent: &str) -> RequestBuilder {
    let builder = builder.header(reqwest::header::USER_AGENT, user_agent);
    match referer_for(url) {
        Some(referer) => builder.header(reqwest::header::REFERER, referer),
        None => builder,
    }
}

/// GET with the site's User-Agent and Referer conventions applied.
pub async fn get(client: &Client, url: &str, user_agent: &str) -> reqwest::Result<Response> {
    with_site_headers(client.get(url), url, user_agent).send().await
}

/// Form-encoded POST with the site's header conventions applied.
pub async fn post_form(
    client: &Client,
    url: &str,
    user_agent: &str,
    fields: &[(&str, &str)],
) -> reqwest::Result<Response> {
    with_site_headers(client.post(url), url, user_agent)
        .form(fields)
        .send()
        .await
}

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random lowercase alphanumeric token, e.g. for upload session ids.
pub fn random_token(len: usize) -> String {
    (0..len)
        .map(|_| TOKEN_CHARSET[OsRng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}
