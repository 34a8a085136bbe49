//! Change significance scoring.
//!
//! Compares a freshly captured snapshot with the last accepted one and
//! produces a significance in `[0.0, 1.0]`.
//!
//! Formula: `significance = clamp(title + description + state, 0, 1)` where
//! each term is its configured weight when the field changed, and the
//! description term also gains `magnitude * description_magnitude_bonus`.

use crate::config::MonitorConfig;
use crate::monitor::snapshot::RequirementSnapshot;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::collections::BTreeSet;

/// A monitored field that differed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    Title,
    Description,
    State,
}

/// Result of comparing two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub has_changes: bool,
    pub significance: f64,
    pub changed_fields: BTreeSet<ChangedField>,
}

impl ScoreOutcome {
    fn first_sight() -> Self {
        Self {
            has_changes: true,
            significance: 1.0,
            changed_fields: [ChangedField::Title, ChangedField::Description, ChangedField::State]
                .into_iter()
                .collect(),
        }
    }

    fn unchanged() -> Self {
        Self {
            has_changes: false,
            significance: 0.0,
            changed_fields: BTreeSet::new(),
        }
    }
}

/// Score `current` against `previous`.
///
/// # Scoring Formula
///
/// ```text
/// title       = w_title                                  if title differs
/// description = w_description + magnitude * w_bonus      if description differs
/// state       = w_state                                  if state differs
/// significance = clamp(title + description + state, 0.0, 1.0)
/// magnitude    = 1.0 - word_similarity(previous, current)
/// ```
///
/// - No previous snapshot scores `1.0` with every field marked changed.
/// - With hash comparison enabled, identical content in an unchanged
///   workflow state short-circuits to `0.0` without diffing. The hash only
///   covers title and description, so a state transition is still scored.
/// - Contributions add, so several simultaneous changes always score at
///   least as high as any one of them.
pub fn score(
    previous: Option<&RequirementSnapshot>,
    current: &RequirementSnapshot,
    config: &MonitorConfig,
) -> ScoreOutcome {
    let Some(previous) = previous else {
        return ScoreOutcome::first_sight();
    };

    if config.enable_content_hash_comparison
        && previous.is_content_identical(current)
        && previous.state == current.state
    {
        return ScoreOutcome::unchanged();
    }

    let weights = &config.scoring;
    let mut changed_fields = BTreeSet::new();
    let mut total = 0.0;

    if previous.title != current.title {
        changed_fields.insert(ChangedField::Title);
        total += weights.title;
    }
    if previous.description != current.description {
        changed_fields.insert(ChangedField::Description);
        let magnitude = edit_magnitude(&previous.description, &current.description);
        total += weights.description + magnitude * weights.description_magnitude_bonus;
    }
    if previous.state != current.state {
        changed_fields.insert(ChangedField::State);
        total += weights.state;
    }

    if changed_fields.is_empty() {
        return ScoreOutcome::unchanged();
    }

    ScoreOutcome {
        has_changes: true,
        significance: clamp_unit(total),
        changed_fields,
    }
}

/// Relative size of an edit: `0.0` for identical text, `1.0` for a complete
/// rewrite, measured on word tokens.
pub fn edit_magnitude(old: &str, new: &str) -> f64 {
    let ratio = f64::from(TextDiff::from_words(old, new).ratio());
    clamp_unit(1.0 - ratio)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
