//! Status and statistics reporting.

use crate::config::MonitorConfig;
use crate::monitor::runner::RunState;
use crate::monitor::state::{ChangeRecord, DecisionRecord, ItemPhase, MonitoredItemState, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of change records returned by [`ItemChanges`].
pub const RECENT_CHANGES: usize = 5;

/// Per-item summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub phase: ItemPhase,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub has_snapshot: bool,
    pub stories_extracted: bool,
    pub extracted_stories_count: usize,
    pub change_extraction_count: u32,
    pub last_change_significance: f64,
    pub last_sync_result: Option<SyncResult>,
    pub last_decision: Option<DecisionRecord>,
    pub checking: bool,
}

impl ItemSummary {
    pub fn from_state(id: &str, state: &MonitoredItemState) -> Self {
        Self {
            id: id.to_owned(),
            phase: state.phase(),
            last_check: state.last_check,
            consecutive_errors: state.consecutive_errors,
            last_error: state.last_error.clone(),
            has_snapshot: state.last_snapshot.is_some(),
            stories_extracted: state.stories_extracted,
            extracted_stories_count: state.extracted_story_ids.len(),
            change_extraction_count: state.change_extraction_count,
            last_change_significance: state.last_change_significance,
            last_sync_result: state.last_sync_result.clone(),
            last_decision: state.last_decision.clone(),
            checking: state.in_flight,
        }
    }
}

/// Aggregate counters across all monitored items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatistics {
    pub total_items: usize,
    pub new_items: usize,
    pub stable_items: usize,
    pub pending_items: usize,
    pub error_items: usize,
    pub items_with_snapshots: usize,
    pub items_with_stories: usize,
    pub total_extracted_stories: usize,
    pub total_extractions: u64,
    pub change_extractions: u64,
    pub manual_override_extractions: u64,
    pub failed_extractions: u64,
    pub significant_change_events: u64,
    pub average_change_extractions: f64,
}

impl MonitorStatistics {
    pub fn collect<'a>(states: impl IntoIterator<Item = &'a MonitoredItemState>) -> Self {
        let mut stats = Self::default();
        for state in states {
            stats.total_items += 1;
            match state.phase() {
                ItemPhase::New => stats.new_items += 1,
                ItemPhase::ChangedEligible => stats.pending_items += 1,
                _ => stats.stable_items += 1,
            }
            if state.consecutive_errors > 0 {
                stats.error_items += 1;
            }
            if state.last_snapshot.is_some() {
                stats.items_with_snapshots += 1;
            }
            if state.stories_extracted {
                stats.items_with_stories += 1;
            }
            stats.total_extracted_stories += state.extracted_story_ids.len();
            stats.total_extractions += u64::from(state.successful_extractions);
            stats.change_extractions += u64::from(state.change_extraction_count);
            stats.manual_override_extractions += u64::from(state.manual_override_extractions);
            stats.failed_extractions += u64::from(state.failed_extractions);
            stats.significant_change_events += u64::from(state.significant_changes);
        }
        if stats.total_items > 0 {
            stats.average_change_extractions =
                stats.change_extractions as f64 / stats.total_items as f64;
        }
        stats
    }
}

/// Full status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub run_state: RunState,
    pub config: MonitorConfig,
    pub statistics: MonitorStatistics,
    pub items: Vec<ItemSummary>,
}

/// Change statistics for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChanges {
    pub id: String,
    pub change_extraction_count: u32,
    pub max_changes_per_item: u32,
    pub last_change_significance: f64,
    pub last_significant_change: Option<DateTime<Utc>>,
    pub history_len: usize,
    /// Newest last.
    pub recent_changes: Vec<ChangeRecord>,
}

impl ItemChanges {
    pub fn from_state(id: &str, state: &MonitoredItemState, config: &MonitorConfig) -> Self {
        let skip = state.change_history.len().saturating_sub(RECENT_CHANGES);
        Self {
            id: id.to_owned(),
            change_extraction_count: state.change_extraction_count,
            max_changes_per_item: config.max_changes_per_item,
            last_change_significance: state.last_change_significance,
            last_significant_change: state.last_significant_change,
            history_len: state.change_history.len(),
            recent_changes: state.change_history.iter().skip(skip).cloned().collect(),
        }
    }
}
