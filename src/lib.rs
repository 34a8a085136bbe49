//! reqwatch: change-aware monitoring of externally tracked requirements.
//!
//! Periodically polls a set of requirement items, fingerprints their
//! content, scores how significant each change is and decides whether to
//! trigger a downstream extraction workflow.
//!
//! # Architecture
//!
//! - **Snapshot**: normalized capture of an item plus a SHA-256 content hash
//! - **Scoring**: weighted field deltas, clamped to `[0.0, 1.0]`
//! - **Store**: one lock-guarded table of per-item state and configuration
//! - **Decision**: first sight, threshold, cap, cooldown, manual override
//! - **Runner**: background poll loop with retry/backoff and cancellable waits
//! - **Control**: add/remove/force-check/status/config, safe while running
//! - **API**: axum JSON control plane over the control surface

pub mod api;
pub mod config;
pub mod error;
pub mod monitor;
pub mod persist;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod tracker;

pub use config::{MonitorConfig, MonitorConfigPatch, ScoringWeights};
pub use error::{MonitorError, Result};
pub use monitor::{Monitor, MonitorBuilder, RunState};
pub use tracker::{ExtractionWorkflow, RequirementTracker};
