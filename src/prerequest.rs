//! Chained pre-requests: the HTTP calls made before an upload to harvest
//! CSRF tokens, cookies and dynamically issued endpoints.

use crate::client;
use crate::error::UploadError;
use crate::extract;
use crate::protocol::PreRequestSpec;
use reqwest::Client;
use std::collections::HashMap;
use tracing::debug;

/// Chains are bounded linear lists, not cycles; anything deeper than this
/// is a malformed spec.
const MAX_CHAIN_DEPTH: usize = 8;

/// What a pre-request chain produced.
#[derive(Debug)]
pub struct PreRequestOutcome {
    /// Named extractions, later links overriding earlier ones.
    pub extracted: HashMap<String, String>,
    /// Private-jar client the upload must reuse, when the chain asked for
    /// its own cookie session.
    pub session_client: Option<Client>,
}

/// Runs the chain headed by `spec`. The head link decides the client: a
/// fresh private-jar client when `use_cookies` is set, the shared client
/// otherwise. Every link of the chain runs on that same client.
pub async fn execute(
    shared: &Client,
    spec: &PreRequestSpec,
    user_agent: &str,
) -> Result<PreRequestOutcome, UploadError> {
    if chain_length(spec) > MAX_CHAIN_DEPTH {
        return Err(UploadError::PreRequestDepth);
    }

    let session_client = if spec.use_cookies {
        Some(client::build_private_client()?)
    } else {
        None
    };
    let effective = session_client.as_ref().unwrap_or(shared);

    let mut extracted = HashMap::new();
    let mut link = Some(spec);
    while let Some(current) = link {
        run_link(effective, current, user_agent, &mut extracted).await?;
        link = current.follow_up_request.as_deref();
    }

    Ok(PreRequestOutcome {
        extracted,
        session_client,
    })
}

fn chain_length(spec: &PreRequestSpec) -> usize {
    let mut length = 0;
    let mut link = Some(spec);
    while let Some(current) = link {
        length += 1;
        if length > MAX_CHAIN_DEPTH {
            break;
        }
        link = current.follow_up_request.as_deref();
    }
    length
}

async fn run_link(
    client: &Client,
    spec: &PreRequestSpec,
    user_agent: &str,
    extracted: &mut HashMap<String, String>,
) -> Result<(), UploadError> {
    let method = reqwest::Method::from_bytes(spec.method.as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut request = client
        .request(method, &spec.url)
        .header(reqwest::header::USER_AGENT, user_agent);
    for (name, value) in &spec.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if !spec.form_fields.is_empty() {
        request = request.form(&spec.form_fields);
    }

    let body = request.send().await?.text().await?;
    debug!(url = %spec.url, response_type = %spec.response_type, "pre-request completed");

    match spec.response_type.as_str() {
        "json" => {
            // A malformed body extracts nothing rather than failing the
            // upload outright; individual fields default to empty.
            let data: serde_json::Value =
                serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
            for (name, path) in &spec.extract_fields {
                extracted.insert(name.clone(), extract::json_value_at(&data, path));
            }
        }
        _ => {
            for (name, selector) in &spec.extract_fields {
                extracted.insert(name.clone(), extract::select_first_value(&body, selector));
            }
        }
    }
    Ok(())
}
