//! Monitor configuration.
//!
//! [`MonitorConfig`] is process-wide and mutated only through
//! [`MonitorConfigPatch`], which merges into a copy, validates the copy and
//! only then replaces the live value. A rejected patch leaves the previous
//! configuration untouched.

use crate::error::{MonitorError, Result};
use crate::monitor::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Weight table for the change scorer.
///
/// Contributions add and the final score is clamped to `[0.0, 1.0]`, so the
/// weights do not need to sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Added when the title differs.
    pub title: f64,
    /// Added when the description differs at all.
    pub description: f64,
    /// Scaled by the relative size of a description edit (0 for a one-word
    /// tweak, the full value for a complete rewrite).
    pub description_magnitude_bonus: f64,
    /// Added when the workflow state differs.
    pub state: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            title: 0.35,
            description: 0.30,
            description_magnitude_bonus: 0.15,
            state: 0.25,
        }
    }
}

impl ScoringWeights {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("scoring.title", self.title),
            ("scoring.description", self.description),
            (
                "scoring.description_magnitude_bonus",
                self.description_magnitude_bonus,
            ),
            ("scoring.state", self.state),
        ];
        for (name, value) in fields {
            ensure_unit_interval(name, value)?;
        }
        Ok(())
    }
}

/// Process-wide monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between the starts of two poll cycles.
    pub poll_interval_seconds: u64,
    /// Allow scheduled cycles to invoke the extraction workflow. When off,
    /// eligible items are reported but only force-checks extract.
    pub auto_sync: bool,
    /// Extract the first time an item is successfully observed.
    pub auto_extract_new_epics: bool,
    /// Extract on first sight even if the item was processed before.
    pub skip_duplicate_check: bool,
    /// Minimum hours between two automatic extractions of the same item.
    pub extraction_cooldown_hours: f64,
    /// Short-circuit scoring when content hashes match.
    pub enable_content_hash_comparison: bool,
    /// Allow re-extraction after the first sight.
    pub enable_change_based_extraction: bool,
    /// Minimum significance that makes a change eligible.
    pub change_significance_threshold: f64,
    /// Cap on change-triggered extractions per item.
    #[serde(alias = "max_changes_per_epic")]
    pub max_changes_per_item: u32,
    /// Fetch attempts per check (first try included).
    pub retry_attempts: u32,
    /// Base delay of the exponential fetch backoff.
    pub retry_delay_seconds: f64,
    /// Let force-checks bypass cooldown and cap.
    pub manual_override_enabled: bool,
    /// Change scorer weight table.
    pub scoring: ScoringWeights,
    /// Per-item bound on `change_history`.
    pub history_limit: usize,
    /// Items checked concurrently within one cycle.
    pub max_concurrent_checks: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 300,
            auto_sync: true,
            auto_extract_new_epics: true,
            skip_duplicate_check: false,
            extraction_cooldown_hours: 12.0,
            enable_content_hash_comparison: true,
            enable_change_based_extraction: true,
            change_significance_threshold: 0.3,
            max_changes_per_item: 5,
            retry_attempts: 3,
            retry_delay_seconds: 5.0,
            manual_override_enabled: true,
            scoring: ScoringWeights::default(),
            history_limit: 100,
            max_concurrent_checks: 1,
        }
    }
}

impl MonitorConfig {
    /// Check every field against its allowed range.
    ///
    /// # Errors
    /// Returns [`MonitorError::ConfigValidation`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(MonitorError::ConfigValidation(
                "poll_interval_seconds must be at least 1".into(),
            ));
        }
        ensure_non_negative("extraction_cooldown_hours", self.extraction_cooldown_hours)?;
        ensure_unit_interval(
            "change_significance_threshold",
            self.change_significance_threshold,
        )?;
        if self.retry_attempts == 0 {
            return Err(MonitorError::ConfigValidation(
                "retry_attempts must be at least 1".into(),
            ));
        }
        ensure_non_negative("retry_delay_seconds", self.retry_delay_seconds)?;
        if self.history_limit == 0 {
            return Err(MonitorError::ConfigValidation(
                "history_limit must be at least 1".into(),
            ));
        }
        if self.max_concurrent_checks == 0 {
            return Err(MonitorError::ConfigValidation(
                "max_concurrent_checks must be at least 1".into(),
            ));
        }
        self.scoring.validate()
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Cooldown window as a chrono duration (millisecond resolution).
    pub fn cooldown(&self) -> chrono::Duration {
        let millis = (self.extraction_cooldown_hours * 3_600_000.0).round();
        chrono::Duration::milliseconds(millis.min(i64::MAX as f64) as i64)
    }

    /// Backoff policy for upstream fetches.
    pub fn retry_policy(&self) -> RetryPolicy {
        let base_delay =
            Duration::try_from_secs_f64(self.retry_delay_seconds).unwrap_or(Duration::MAX);
        RetryPolicy::new(self.retry_attempts, base_delay)
    }
}

/// Partial configuration update.
///
/// Integer fields are signed so that out-of-range input (such as a negative
/// interval) surfaces as a validation error instead of a parse error.
/// Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfigPatch {
    pub poll_interval_seconds: Option<i64>,
    pub auto_sync: Option<bool>,
    pub auto_extract_new_epics: Option<bool>,
    pub skip_duplicate_check: Option<bool>,
    pub extraction_cooldown_hours: Option<f64>,
    pub enable_content_hash_comparison: Option<bool>,
    pub enable_change_based_extraction: Option<bool>,
    pub change_significance_threshold: Option<f64>,
    #[serde(alias = "max_changes_per_epic")]
    pub max_changes_per_item: Option<i64>,
    pub retry_attempts: Option<i64>,
    pub retry_delay_seconds: Option<f64>,
    pub manual_override_enabled: Option<bool>,
    pub scoring: Option<ScoringWeightsPatch>,
    pub history_limit: Option<i64>,
    pub max_concurrent_checks: Option<i64>,
}

/// Partial update of the weight table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringWeightsPatch {
    pub title: Option<f64>,
    pub description: Option<f64>,
    pub description_magnitude_bonus: Option<f64>,
    pub state: Option<f64>,
}

impl MonitorConfigPatch {
    /// Parse a patch from an arbitrary JSON value.
    ///
    /// # Errors
    /// Returns [`MonitorError::ConfigValidation`] for unknown keys or
    /// mistyped values.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| MonitorError::ConfigValidation(format!("invalid config update: {e}")))
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.poll_interval_seconds.is_none()
            && self.auto_sync.is_none()
            && self.auto_extract_new_epics.is_none()
            && self.skip_duplicate_check.is_none()
            && self.extraction_cooldown_hours.is_none()
            && self.enable_content_hash_comparison.is_none()
            && self.enable_change_based_extraction.is_none()
            && self.change_significance_threshold.is_none()
            && self.max_changes_per_item.is_none()
            && self.retry_attempts.is_none()
            && self.retry_delay_seconds.is_none()
            && self.manual_override_enabled.is_none()
            && self.scoring.is_none()
            && self.history_limit.is_none()
            && self.max_concurrent_checks.is_none()
    }

    /// Merge into a copy of `base` and validate the result.
    ///
    /// `base` itself is never modified, so the caller can swap the returned
    /// value in atomically.
    ///
    /// # Errors
    /// Returns [`MonitorError::ConfigValidation`] if any merged field is out
    /// of range.
    pub fn apply_to(&self, base: &MonitorConfig) -> Result<MonitorConfig> {
        let mut next = base.clone();

        if let Some(v) = self.poll_interval_seconds {
            next.poll_interval_seconds = to_unsigned("poll_interval_seconds", v)?;
        }
        if let Some(v) = self.auto_sync {
            next.auto_sync = v;
        }
        if let Some(v) = self.auto_extract_new_epics {
            next.auto_extract_new_epics = v;
        }
        if let Some(v) = self.skip_duplicate_check {
            next.skip_duplicate_check = v;
        }
        if let Some(v) = self.extraction_cooldown_hours {
            next.extraction_cooldown_hours = v;
        }
        if let Some(v) = self.enable_content_hash_comparison {
            next.enable_content_hash_comparison = v;
        }
        if let Some(v) = self.enable_change_based_extraction {
            next.enable_change_based_extraction = v;
        }
        if let Some(v) = self.change_significance_threshold {
            next.change_significance_threshold = v;
        }
        if let Some(v) = self.max_changes_per_item {
            next.max_changes_per_item = to_unsigned("max_changes_per_item", v)?;
        }
        if let Some(v) = self.retry_attempts {
            next.retry_attempts = to_unsigned("retry_attempts", v)?;
        }
        if let Some(v) = self.retry_delay_seconds {
            next.retry_delay_seconds = v;
        }
        if let Some(v) = self.manual_override_enabled {
            next.manual_override_enabled = v;
        }
        if let Some(scoring) = &self.scoring {
            if let Some(v) = scoring.title {
                next.scoring.title = v;
            }
            if let Some(v) = scoring.description {
                next.scoring.description = v;
            }
            if let Some(v) = scoring.description_magnitude_bonus {
                next.scoring.description_magnitude_bonus = v;
            }
            if let Some(v) = scoring.state {
                next.scoring.state = v;
            }
        }
        if let Some(v) = self.history_limit {
            next.history_limit = to_unsigned("history_limit", v)?;
        }
        if let Some(v) = self.max_concurrent_checks {
            next.max_concurrent_checks = to_unsigned("max_concurrent_checks", v)?;
        }

        next.validate()?;
        Ok(next)
    }
}

fn to_unsigned<T: TryFrom<i64>>(name: &str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| {
        MonitorError::ConfigValidation(format!("{name} must be a non-negative integer, got {value}"))
    })
}

fn ensure_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(MonitorError::ConfigValidation(format!(
            "{name} must be a finite non-negative number, got {value}"
        )));
    }
    Ok(())
}

fn ensure_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(MonitorError::ConfigValidation(format!(
            "{name} must be within [0.0, 1.0], got {value}"
        )));
    }
    Ok(())
}
