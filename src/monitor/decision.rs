//! Extraction decision engine.
//!
//! Pure policy: given what is known about an item, the freshly computed
//! score and the current time, decide whether the extraction workflow
//! should run. Rules are evaluated in a fixed order:
//!
//! 1. operator re-extraction (always extracts)
//! 2. first sight (bypasses threshold, cooldown and cap, but not an id
//!    already processed before a restart)
//! 3. no detected change
//! 4. change-based extraction disabled
//! 5. below threshold
//! 6. cap reached (manual override may bypass)
//! 7. cooldown active (manual override may bypass)
//! 8. scheduled check with `auto_sync` off (deferred)
//! 9. extract

use crate::config::MonitorConfig;
use crate::monitor::scoring::ScoreOutcome;
use crate::monitor::state::{ExtractionKind, ItemPhase, MonitoredItemState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What caused a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckTrigger {
    /// Regular poll cycle.
    Scheduled,
    /// Operator force-check; may bypass cooldown and cap.
    Forced,
    /// Operator re-extraction; extracts regardless of score.
    Reextract,
}

impl CheckTrigger {
    pub fn is_manual(self) -> bool {
        !matches!(self, Self::Scheduled)
    }
}

/// The facts about an item the engine needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionInput {
    /// No snapshot accepted yet.
    pub is_new: bool,
    /// Stories were already extracted for this id (possibly before a
    /// restart).
    pub already_processed: bool,
    pub change_extraction_count: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl DecisionInput {
    pub fn from_state(state: &MonitoredItemState, processed: bool) -> Self {
        Self {
            is_new: state.last_snapshot.is_none(),
            already_processed: state.stories_extracted || processed,
            change_extraction_count: state.change_extraction_count,
            last_sync_at: state.last_sync_at(),
        }
    }
}

/// Verdict of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub extract: bool,
    pub reason: String,
    pub phase: ItemPhase,
    /// Set when `extract` is true.
    pub kind: Option<ExtractionKind>,
    /// Eligible, but held back because scheduled extraction is off.
    pub deferred: bool,
}

impl Decision {
    fn extract(phase: ItemPhase, kind: ExtractionKind, reason: &str) -> Self {
        Self {
            extract: true,
            reason: reason.to_owned(),
            phase,
            kind: Some(kind),
            deferred: false,
        }
    }

    fn skip(phase: ItemPhase, reason: &str) -> Self {
        Self {
            extract: false,
            reason: reason.to_owned(),
            phase,
            kind: None,
            deferred: false,
        }
    }

    fn deferred(phase: ItemPhase) -> Self {
        Self {
            deferred: true,
            ..Self::skip(phase, "auto sync disabled")
        }
    }
}

/// Decide whether to extract.
pub fn decide(
    input: &DecisionInput,
    config: &MonitorConfig,
    outcome: &ScoreOutcome,
    now: DateTime<Utc>,
    trigger: CheckTrigger,
) -> Decision {
    let override_enabled = trigger.is_manual() && config.manual_override_enabled;

    if trigger == CheckTrigger::Reextract && config.manual_override_enabled {
        let kind = if input.is_new {
            ExtractionKind::FirstSight
        } else {
            ExtractionKind::ManualOverride
        };
        let phase = if input.is_new {
            ItemPhase::New
        } else {
            ItemPhase::ChangedEligible
        };
        return Decision::extract(phase, kind, "manual re-extraction");
    }

    if input.is_new {
        if !config.auto_extract_new_epics {
            return Decision::skip(ItemPhase::New, "auto extraction of new items disabled");
        }
        if input.already_processed && !config.skip_duplicate_check {
            return Decision::skip(ItemPhase::New, "already processed");
        }
        if trigger == CheckTrigger::Scheduled && !config.auto_sync {
            return Decision::deferred(ItemPhase::New);
        }
        return Decision::extract(ItemPhase::New, ExtractionKind::FirstSight, "first sight");
    }

    if !outcome.has_changes {
        return Decision::skip(ItemPhase::Stable, "no changes detected");
    }

    if !config.enable_change_based_extraction {
        return Decision::skip(ItemPhase::Stable, "change-based extraction disabled");
    }

    if outcome.significance < config.change_significance_threshold {
        return Decision::skip(ItemPhase::ChangedBelowThreshold, "below threshold");
    }

    let mut bypassed = false;

    if input.change_extraction_count >= config.max_changes_per_item {
        if !override_enabled {
            return Decision::skip(ItemPhase::CapExceeded, "cap exceeded");
        }
        bypassed = true;
    }

    if cooldown_active(input.last_sync_at, config, now) {
        if !override_enabled {
            return Decision::skip(ItemPhase::CooldownBlocked, "cooldown");
        }
        bypassed = true;
    }

    if trigger == CheckTrigger::Scheduled && !config.auto_sync {
        return Decision::deferred(ItemPhase::ChangedEligible);
    }

    if bypassed {
        Decision::extract(
            ItemPhase::ChangedEligible,
            ExtractionKind::ManualOverride,
            "manual override",
        )
    } else {
        Decision::extract(
            ItemPhase::ChangedEligible,
            ExtractionKind::ChangeTriggered,
            "change threshold met",
        )
    }
}

/// True while `now` is inside the cooldown window that started at the last
/// extraction attempt.
pub fn cooldown_active(
    last_sync_at: Option<DateTime<Utc>>,
    config: &MonitorConfig,
    now: DateTime<Utc>,
) -> bool {
    match last_sync_at {
        Some(at) => now.signed_duration_since(at) < config.cooldown(),
        None => false,
    }
}
