//! HTTP plumbing shared by the embedding and generation backends.
//!
//! Maps transport and status failures onto the error taxonomy:
//! - request timeout → [`RagError::Timeout`]
//! - connection/network error, HTTP 429, HTTP 5xx → [`RagError::ServiceUnavailable`]
//! - other HTTP 4xx, undecodable body → [`RagError::Upstream`]

use std::time::Duration;

use ragbase_core::{RagError, Result};

pub fn client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub async fn post_json(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    body: &serde_json::Value,
    bearer: Option<&str>,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let mut request = client.post(url).json(body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            RagError::Timeout {
                operation: format!("{} request", service),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            RagError::unavailable(service, format!("request to {} failed: {}", url, e))
        }
    })?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| RagError::upstream(service, format!("invalid JSON response: {}", e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("HTTP {}: {}", status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(RagError::unavailable(service, message))
    } else {
        Err(RagError::upstream(service, message))
    }
}
