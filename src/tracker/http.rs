//! JSON-over-HTTP collaborator adapters.
//!
//! - [`HttpRequirementTracker`]: `GET {base}/requirements/{id}`
//! - [`HttpExtractionWorkflow`]: `POST {base}/extractions` with `{"item_id": id}`
//!
//! Status classification for fetches:
//!
//! - 408, 429, 5xx, timeouts, connection failures → [`FetchError::Transient`]
//! - any other non-2xx status, or a body that is not a JSON object →
//!   [`FetchError::Permanent`]

use super::{
    ExtractionError, ExtractionOutcome, ExtractionWorkflow, FetchError, RequirementTracker,
};
use crate::error::{MonitorError, Result};
use crate::monitor::snapshot::RequirementFields;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest response excerpt kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 200;

fn parse_base_url(base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url)
        .map_err(|e| MonitorError::ConfigValidation(format!("invalid base url '{base_url}': {e}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(MonitorError::ConfigValidation(format!(
            "base url '{base_url}' must be an http(s) url"
        )));
    }
    Ok(url)
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| MonitorError::Internal(format!("cannot build http client: {e}")))
}

/// Append path segments to `base`, percent-encoding each one.
fn endpoint(base: &Url, segments: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
    Some(url)
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Classify a transport failure.
fn classify_reqwest_error(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Transient(format!("request timed out: {err}"))
    } else if err.is_connect() {
        FetchError::Transient(format!("tracker unreachable: {err}"))
    } else if err.is_builder() {
        FetchError::Permanent(format!("invalid request: {err}"))
    } else {
        FetchError::Transient(format!("request failed: {err}"))
    }
}

/// Classify a non-success HTTP status.
fn classify_status(status: StatusCode, body: &str) -> FetchError {
    let message = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), excerpt(body))
    };
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        FetchError::Transient(message)
    } else {
        FetchError::Permanent(message)
    }
}

// ── Tracker ────────────────────────────────────────────────────

/// Requirement tracker reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRequirementTracker {
    base: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpRequirementTracker {
    /// Create an adapter for `base_url` with an optional bearer token.
    ///
    /// # Errors
    /// Returns [`MonitorError::ConfigValidation`] for a non-http(s) url.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base: parse_base_url(base_url)?,
            token: token.filter(|t| !t.is_empty()),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl RequirementTracker for HttpRequirementTracker {
    async fn fetch(&self, id: &str) -> std::result::Result<RequirementFields, FetchError> {
        let url = endpoint(&self.base, &["requirements", id])
            .ok_or_else(|| FetchError::Permanent(format!("cannot build url for '{id}'")))?;
        debug!(item_id = id, %url, "fetching requirement");

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            FetchError::Permanent(format!("malformed tracker response for '{id}': {e}"))
        })?;
        if !value.is_object() {
            return Err(FetchError::Permanent(format!(
                "tracker response for '{id}' is not an object"
            )));
        }
        Ok(RequirementFields::from_json(&value))
    }
}

// ── Workflow ───────────────────────────────────────────────────

/// Extraction workflow reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpExtractionWorkflow {
    base: Url,
    client: reqwest::Client,
}

impl HttpExtractionWorkflow {
    /// Create an adapter for `base_url`.
    ///
    /// # Errors
    /// Returns [`MonitorError::ConfigValidation`] for a non-http(s) url.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base: parse_base_url(base_url)?,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl ExtractionWorkflow for HttpExtractionWorkflow {
    async fn extract(&self, id: &str) -> std::result::Result<ExtractionOutcome, ExtractionError> {
        let url = endpoint(&self.base, &["extractions"])
            .ok_or_else(|| ExtractionError("cannot build extraction url".into()))?;
        debug!(item_id = id, %url, "requesting extraction");

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "item_id": id }))
            .send()
            .await
            .map_err(|e| ExtractionError(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExtractionError(e.to_string()))?;

        let parsed = serde_json::from_str::<ExtractionOutcome>(&body);
        if status.is_success() {
            return parsed.map_err(|e| ExtractionError(format!("malformed workflow response: {e}")));
        }

        let error = parsed
            .ok()
            .and_then(|outcome| outcome.error)
            .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), excerpt(&body)));
        Ok(ExtractionOutcome::failed(error))
    }
}
