//! Collaborator interfaces consumed by the monitor.
//!
//! The monitor never talks to a tracker or workflow directly. It goes
//! through [`RequirementTracker`] for content and [`ExtractionWorkflow`] for
//! downstream extraction, so tests and alternative backends plug in here.

pub mod http;

use crate::monitor::snapshot::RequirementFields;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::{HttpExtractionWorkflow, HttpRequirementTracker};

/// Failure while fetching an item from the tracker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network, timeout, rate-limit or 5xx-like failure. Retried.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Not found, unauthorized or malformed id. Never retried.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Returns true if the fetch may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

/// Transport-level failure while invoking the extraction workflow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("extraction workflow unavailable: {0}")]
pub struct ExtractionError(pub String);

/// Result reported by the extraction workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOutcome {
    pub success: bool,
    pub created_ids: Vec<String>,
    pub updated_ids: Vec<String>,
    pub error: Option<String>,
}

impl ExtractionOutcome {
    /// Successful outcome with the given created ids.
    pub fn created(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            success: true,
            created_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Failed outcome with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Source of truth for requirement content.
#[async_trait]
pub trait RequirementTracker: Send + Sync {
    /// Fetch the current fields of `id`.
    async fn fetch(&self, id: &str) -> Result<RequirementFields, FetchError>;
}

/// Downstream workflow that turns a requirement into stories.
#[async_trait]
pub trait ExtractionWorkflow: Send + Sync {
    /// Run extraction for `id`.
    async fn extract(&self, id: &str) -> Result<ExtractionOutcome, ExtractionError>;
}
