//! Per-item monitoring state.

use crate::monitor::scoring::ChangedField;
use crate::monitor::snapshot::RequirementSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Decision-engine view of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemPhase {
    /// Never successfully observed.
    New,
    /// Observed, nothing pending.
    Stable,
    /// Latest change scored under the threshold.
    ChangedBelowThreshold,
    /// Latest change qualifies for extraction.
    ChangedEligible,
    /// Qualifying change held back by the cooldown window.
    CooldownBlocked,
    /// Qualifying change held back by the per-item cap.
    CapExceeded,
}

/// How an extraction came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionKind {
    /// First successful observation of the item.
    FirstSight,
    /// Automatic extraction after a significant change.
    ChangeTriggered,
    /// Operator-triggered extraction that bypassed cooldown or cap.
    ManualOverride,
}

/// Outcome of the most recent extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
    pub kind: ExtractionKind,
    #[serde(default)]
    pub created_ids: Vec<String>,
    #[serde(default)]
    pub updated_ids: Vec<String>,
}

/// One detected change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub timestamp: DateTime<Utc>,
    pub significance: f64,
    pub changed_fields: BTreeSet<ChangedField>,
    /// Whether this change led to a successful extraction.
    pub extracted: bool,
}

/// The most recent decision taken for an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub phase: ItemPhase,
    pub extract: bool,
    pub reason: String,
}

/// Mutable monitoring state for one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemState {
    pub last_check: Option<DateTime<Utc>>,
    pub last_snapshot: Option<RequirementSnapshot>,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub stories_extracted: bool,
    pub extracted_story_ids: Vec<String>,
    pub change_extraction_count: u32,
    pub manual_override_extractions: u32,
    pub successful_extractions: u32,
    pub failed_extractions: u32,
    pub significant_changes: u32,
    pub last_change_significance: f64,
    pub last_significant_change: Option<DateTime<Utc>>,
    pub change_history: Vec<ChangeRecord>,
    pub last_sync_result: Option<SyncResult>,
    pub last_decision: Option<DecisionRecord>,
    /// A fetched change that was not accepted (failed or deferred
    /// extraction) and will be re-evaluated next check.
    pub pending_change: bool,
    /// Fingerprint of the most recently fetched snapshot, accepted or not.
    #[serde(skip)]
    pub last_observed: Option<String>,
    /// Set while a check owns the item.
    #[serde(skip)]
    pub in_flight: bool,
    /// Distinguishes this entry from an earlier one with the same id.
    #[serde(skip)]
    pub generation: u64,
}

impl MonitoredItemState {
    /// Fresh state for a newly added item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state seeded from the persisted processed set.
    pub fn with_processed(processed: bool) -> Self {
        Self {
            stories_extracted: processed,
            ..Self::default()
        }
    }

    /// Resting phase: `NEW` without a snapshot, `CHANGED_ELIGIBLE` while a
    /// change awaits acceptance, otherwise `STABLE`.
    pub fn phase(&self) -> ItemPhase {
        if self.last_snapshot.is_none() {
            ItemPhase::New
        } else if self.pending_change {
            ItemPhase::ChangedEligible
        } else {
            ItemPhase::Stable
        }
    }

    /// Append a change record, keeping only the newest `limit` entries.
    pub fn push_change(&mut self, record: ChangeRecord, limit: usize) {
        self.change_history.push(record);
        self.trim_history(limit);
    }

    /// Drop the oldest history entries beyond `limit`.
    pub fn trim_history(&mut self, limit: usize) {
        let limit = limit.max(1);
        if self.change_history.len() > limit {
            let drop_count = self.change_history.len().saturating_sub(limit);
            self.change_history.drain(0..drop_count);
        }
    }

    /// Timestamp that anchors the cooldown window.
    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_sync_result.as_ref().map(|r| r.timestamp)
    }

    /// Clear everything learned about the item so the next successful
    /// check is treated as a first sight. Error counters survive.
    pub fn reset_processed(&mut self) {
        self.last_snapshot = None;
        self.stories_extracted = false;
        self.pending_change = false;
        self.last_observed = None;
        self.change_extraction_count = 0;
        self.last_change_significance = 0.0;
        self.last_decision = None;
    }
}
