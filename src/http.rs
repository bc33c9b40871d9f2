//! Shared HTTP plumbing for the embedding and generation services.
//!
//! Maps transport and status failures onto [`ServiceError`] so the core
//! retry policy can tell transient from permanent:
//! - HTTP 429 and 5xx → transient
//! - other 4xx → permanent
//! - timeouts and connection failures → transient
//! - undecodable response bodies → permanent

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use support_rag_core::ServiceError;

/// Build a client with the configured request timeout.
pub fn client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Send `request` and decode a JSON body, classifying every failure.
pub async fn send_json(request: RequestBuilder, service: &str) -> Result<Value, ServiceError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(service, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(service, status, &body));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ServiceError::permanent(format!("{} returned invalid JSON: {}", service, e)))
}

pub fn status_error(service: &str, status: StatusCode, body: &str) -> ServiceError {
    let message = format!("{} API error {}: {}", service, status, body.trim());
    if is_transient_status(status) {
        ServiceError::transient(message)
    } else {
        ServiceError::permanent(message)
    }
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn transport_error(service: &str, e: &reqwest::Error) -> ServiceError {
    let message = format!("{} request failed: {}", service, e);
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ServiceError::transient(message)
    } else {
        ServiceError::permanent(message)
    }
}
