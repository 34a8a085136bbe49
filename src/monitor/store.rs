//! Lock-guarded item table.
//!
//! All monitor state lives behind one [`std::sync::Mutex`]: the
//! configuration, the per-item states and the processed-id set. Every
//! mutation is a named operation on [`ItemStore`]; nothing outside this
//! module touches a [`MonitoredItemState`] directly. The lock is never held
//! across an `.await`.
//!
//! A check claims its item through [`ItemStore::begin_check`], which hands
//! out a [`CheckLease`]. While the lease lives no other check can start on
//! the same item, so per-item updates are serialized. Every insertion gets
//! a fresh generation; a lease only writes to and releases the entry it
//! claimed, never one re-added under the same id.

use crate::config::{MonitorConfig, MonitorConfigPatch};
use crate::error::{MonitorError, Result};
use crate::monitor::decision::{Decision, DecisionInput};
use crate::monitor::scoring::ScoreOutcome;
use crate::monitor::snapshot::RequirementSnapshot;
use crate::monitor::state::{
    ChangeRecord, DecisionRecord, ExtractionKind, ItemPhase, MonitoredItemState, SyncResult,
};
use crate::monitor::runner::RunState;
use crate::monitor::status::{ItemChanges, ItemSummary, MonitorStatistics, MonitorStatus};
use crate::persist::{DOCUMENT_VERSION, MonitorDocument};
use crate::tracker::{ExtractionError, ExtractionOutcome};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Maximum accepted item id length.
const MAX_ID_LEN: usize = 256;

#[derive(Debug)]
struct StoreInner {
    config: MonitorConfig,
    items: BTreeMap<String, MonitoredItemState>,
    processed: BTreeSet<String>,
    next_generation: u64,
}

impl StoreInner {
    fn fresh_state(&mut self, id: &str) -> MonitoredItemState {
        self.next_generation += 1;
        MonitoredItemState {
            generation: self.next_generation,
            ..MonitoredItemState::with_processed(self.processed.contains(id))
        }
    }
}

/// Thread-safe table of monitored items plus the live configuration.
#[derive(Debug)]
pub struct ItemStore {
    inner: Mutex<StoreInner>,
}

/// Everything a check needs, captured under the lock when it starts.
#[derive(Debug, Clone)]
pub struct CheckContext {
    /// Configuration as of the start of the check.
    pub config: MonitorConfig,
    pub previous: Option<RequirementSnapshot>,
    pub input: DecisionInput,
}

/// The result of a finished extraction attempt.
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    pub kind: ExtractionKind,
    pub finished_at: DateTime<Utc>,
    pub result: std::result::Result<ExtractionOutcome, ExtractionError>,
}

impl ExtractionAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(outcome) if outcome.success)
    }

    fn detail(&self) -> String {
        match &self.result {
            Ok(outcome) if outcome.success => format!(
                "extracted {} new, {} updated",
                outcome.created_ids.len(),
                outcome.updated_ids.len()
            ),
            Ok(outcome) => outcome
                .error
                .clone()
                .unwrap_or_else(|| "extraction workflow reported failure".to_owned()),
            Err(e) => e.to_string(),
        }
    }
}

/// Results of a successful fetch, written back in one step.
#[derive(Debug, Clone)]
pub struct CheckWriteBack {
    pub checked_at: DateTime<Utc>,
    pub snapshot: RequirementSnapshot,
    pub outcome: ScoreOutcome,
    pub decision: Decision,
    pub extraction: Option<ExtractionAttempt>,
}

/// What a write-back changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteBackEffect {
    /// False when the item was removed while the check ran.
    pub applied: bool,
    /// The snapshot became the item's `last_snapshot`.
    pub accepted: bool,
    /// The processed-id set gained a member.
    pub processed_changed: bool,
}

impl ItemStore {
    /// Empty store with the given configuration.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                config,
                items: BTreeMap::new(),
                processed: BTreeSet::new(),
                next_generation: 0,
            }),
        }
    }

    /// Store rebuilt from a persisted document. Every item starts `NEW`.
    pub fn from_document(document: MonitorDocument) -> Self {
        let mut inner = StoreInner {
            config: document.config,
            items: BTreeMap::new(),
            processed: document.processed_ids.into_iter().collect(),
            next_generation: 0,
        };
        for id in document.item_ids {
            if validate_id(&id).is_ok() {
                let state = inner.fresh_state(&id);
                inner.items.insert(id, state);
            }
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| MonitorError::Internal("item store lock poisoned".into()))
    }

    // ── Configuration ──────────────────────────────────────────────

    /// Copy of the live configuration.
    pub fn config(&self) -> Result<MonitorConfig> {
        Ok(self.lock()?.config.clone())
    }

    /// Validate and swap in a patched configuration.
    ///
    /// # Errors
    /// Returns [`MonitorError::ConfigValidation`] and leaves the previous
    /// configuration untouched when the merged result is invalid.
    pub fn update_config(&self, patch: &MonitorConfigPatch) -> Result<MonitorConfig> {
        let mut inner = self.lock()?;
        let next = patch.apply_to(&inner.config)?;
        if next.history_limit < inner.config.history_limit {
            for state in inner.items.values_mut() {
                state.trim_history(next.history_limit);
            }
        }
        inner.config = next.clone();
        Ok(next)
    }

    // ── Item set ───────────────────────────────────────────────────

    /// Add `id` in `NEW` state. Returns false if it was already present.
    ///
    /// # Errors
    /// Returns [`MonitorError::InvalidItemId`] for empty or oversized ids.
    pub fn insert(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let mut inner = self.lock()?;
        if inner.items.contains_key(id) {
            return Ok(false);
        }
        let state = inner.fresh_state(id);
        inner.items.insert(id.to_owned(), state);
        Ok(true)
    }

    /// Remove `id`. Returns false if it was not present.
    pub fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.lock()?.items.remove(id).is_some())
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.lock()?.items.contains_key(id))
    }

    /// Snapshot of the monitored ids, in sorted order.
    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.items.keys().cloned().collect())
    }

    /// Copy of one item's state.
    pub fn item(&self, id: &str) -> Result<Option<MonitoredItemState>> {
        Ok(self.lock()?.items.get(id).cloned())
    }

    // ── Check lifecycle ────────────────────────────────────────────

    /// Claim `id` for a check.
    ///
    /// # Errors
    /// [`MonitorError::UnknownItem`] when absent, [`MonitorError::ItemBusy`]
    /// when another check holds the item.
    pub fn begin_check(self: &Arc<Self>, id: &str) -> Result<(CheckLease, CheckContext)> {
        let mut inner = self.lock()?;
        let config = inner.config.clone();
        let processed = inner.processed.contains(id);
        let state = inner
            .items
            .get_mut(id)
            .ok_or_else(|| MonitorError::UnknownItem(id.to_owned()))?;
        if state.in_flight {
            return Err(MonitorError::ItemBusy(id.to_owned()));
        }
        state.in_flight = true;

        let context = CheckContext {
            config,
            previous: state.last_snapshot.clone(),
            input: DecisionInput::from_state(state, processed),
        };
        let lease = CheckLease {
            store: Arc::clone(self),
            id: id.to_owned(),
            generation: state.generation,
        };
        Ok((lease, context))
    }

    /// Record a fetch that did not produce a snapshot.
    ///
    /// `failed_fetches` is the number of failed upstream calls to add to
    /// `consecutive_errors`. It is zero when `stop()` cancelled the check
    /// before retries were exhausted; only `last_check` moves then.
    pub fn record_fetch_failure(
        &self,
        lease: &CheckLease,
        at: DateTime<Utc>,
        detail: &str,
        failed_fetches: u32,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(state) = leased_state(&mut inner.items, lease) else {
            debug!(
                item_id = lease.id(),
                "item removed during check, dropping fetch failure"
            );
            return Ok(false);
        };
        state.last_check = Some(at);
        if failed_fetches > 0 {
            state.consecutive_errors = state.consecutive_errors.saturating_add(failed_fetches);
            state.last_error = Some(detail.to_owned());
        }
        Ok(true)
    }

    /// Apply the results of a successful fetch.
    ///
    /// The snapshot is accepted unless an extraction was attempted and
    /// failed, an eligible extraction was deferred, or a pending change is
    /// blocked by cooldown. A rejected snapshot
    /// leaves the item with a pending change that the next check scores
    /// again.
    pub fn record_check(
        &self,
        lease: &CheckLease,
        write: CheckWriteBack,
    ) -> Result<WriteBackEffect> {
        let id = lease.id();
        let mut inner = self.lock()?;
        let StoreInner {
            config,
            items,
            processed,
            ..
        } = &mut *inner;

        let Some(state) = leased_state(items, lease) else {
            debug!(item_id = id, "item removed during check, dropping results");
            return Ok(WriteBackEffect::default());
        };

        let mut effect = WriteBackEffect {
            applied: true,
            ..Default::default()
        };

        state.last_check = Some(write.checked_at);
        state.consecutive_errors = 0;
        state.last_error = None;
        state.last_change_significance = write.outcome.significance.clamp(0.0, 1.0);

        let fingerprint = write.snapshot.fingerprint();
        let repeat_observation = state.last_observed.as_deref() == Some(fingerprint.as_str());
        state.last_observed = Some(fingerprint);

        let is_change = write.outcome.has_changes && state.last_snapshot.is_some();
        if is_change
            && !repeat_observation
            && write.outcome.significance >= config.change_significance_threshold
        {
            state.significant_changes = state.significant_changes.saturating_add(1);
            state.last_significant_change = Some(write.checked_at);
        }

        let extracted = write.extraction.as_ref().is_some_and(ExtractionAttempt::succeeded);
        if (write.outcome.has_changes && !repeat_observation) || write.extraction.is_some() {
            let significance = state.last_change_significance;
            state.push_change(
                ChangeRecord {
                    timestamp: write.checked_at,
                    significance,
                    changed_fields: write.outcome.changed_fields.clone(),
                    extracted,
                },
                config.history_limit,
            );
        }

        state.last_decision = Some(DecisionRecord {
            timestamp: write.checked_at,
            phase: write.decision.phase,
            extract: write.decision.extract,
            reason: write.decision.reason.clone(),
        });

        let accept = match &write.extraction {
            Some(attempt) => {
                let detail = attempt.detail();
                let (created_ids, updated_ids) = match &attempt.result {
                    Ok(outcome) => (outcome.created_ids.clone(), outcome.updated_ids.clone()),
                    Err(_) => (Vec::new(), Vec::new()),
                };

                if extracted {
                    state.stories_extracted = true;
                    state.extracted_story_ids.extend(created_ids.iter().cloned());
                    state.successful_extractions = state.successful_extractions.saturating_add(1);
                    match attempt.kind {
                        ExtractionKind::ChangeTriggered => {
                            state.change_extraction_count =
                                state.change_extraction_count.saturating_add(1);
                        }
                        ExtractionKind::ManualOverride => {
                            state.manual_override_extractions =
                                state.manual_override_extractions.saturating_add(1);
                        }
                        ExtractionKind::FirstSight => {}
                    }
                    effect.processed_changed = processed.insert(id.to_owned());
                    info!(
                        item_id = id,
                        kind = ?attempt.kind,
                        created = created_ids.len(),
                        "extraction succeeded"
                    );
                } else {
                    state.failed_extractions = state.failed_extractions.saturating_add(1);
                    info!(item_id = id, kind = ?attempt.kind, "extraction failed: {detail}");
                }

                state.last_sync_result = Some(SyncResult {
                    success: extracted,
                    timestamp: attempt.finished_at,
                    detail,
                    kind: attempt.kind,
                    created_ids,
                    updated_ids,
                });
                extracted
            }
            // A change left pending by a failed extraction stays pending
            // while cooldown holds it back.
            None => {
                !write.decision.deferred
                    && !(state.pending_change
                        && write.decision.phase == ItemPhase::CooldownBlocked)
            }
        };

        if accept {
            state.last_snapshot = Some(write.snapshot);
            state.pending_change = false;
            effect.accepted = true;
        } else {
            state.pending_change = state.last_snapshot.is_some();
        }

        Ok(effect)
    }

    fn release(&self, lease: &CheckLease) {
        if let Ok(mut inner) = self.inner.lock()
            && let Some(state) = leased_state(&mut inner.items, lease)
        {
            state.in_flight = false;
        }
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Forget the processed state of `id` so its next check is a first
    /// sight. Returns false for unknown ids.
    pub fn reset(&self, id: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(state) = inner.items.get_mut(id) else {
            return Ok(false);
        };
        state.reset_processed();
        inner.processed.remove(id);
        Ok(true)
    }

    // ── Reporting ──────────────────────────────────────────────────

    /// Configuration, per-item summaries and aggregate statistics taken
    /// under one lock, so a concurrent config update is never half visible.
    pub fn status(&self, run_state: RunState) -> Result<MonitorStatus> {
        let inner = self.lock()?;
        Ok(MonitorStatus {
            run_state,
            config: inner.config.clone(),
            statistics: MonitorStatistics::collect(inner.items.values()),
            items: inner
                .items
                .iter()
                .map(|(id, state)| ItemSummary::from_state(id, state))
                .collect(),
        })
    }

    /// Change statistics for one item.
    pub fn changes(&self, id: &str) -> Result<ItemChanges> {
        let inner = self.lock()?;
        let state = inner
            .items
            .get(id)
            .ok_or_else(|| MonitorError::UnknownItem(id.to_owned()))?;
        Ok(ItemChanges::from_state(id, state, &inner.config))
    }

    /// Persistable view of the store.
    pub fn document(&self) -> Result<MonitorDocument> {
        let inner = self.lock()?;
        Ok(MonitorDocument {
            version: DOCUMENT_VERSION,
            config: inner.config.clone(),
            item_ids: inner.items.keys().cloned().collect(),
            processed_ids: inner.processed.iter().cloned().collect(),
        })
    }
}

/// Exclusive claim on one item for the duration of a check.
///
/// Dropping the lease releases the item, including on early return or
/// panic inside the check.
#[derive(Debug)]
pub struct CheckLease {
    store: Arc<ItemStore>,
    id: String,
    generation: u64,
}

impl CheckLease {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for CheckLease {
    fn drop(&mut self) {
        self.store.release(self);
    }
}

/// The entry `lease` claimed, if it is still in the table.
fn leased_state<'a>(
    items: &'a mut BTreeMap<String, MonitoredItemState>,
    lease: &CheckLease,
) -> Option<&'a mut MonitoredItemState> {
    items
        .get_mut(&lease.id)
        .filter(|state| state.generation == lease.generation)
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(MonitorError::InvalidItemId("item id must not be empty".into()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(MonitorError::InvalidItemId(format!(
            "item id longer than {MAX_ID_LEN} bytes"
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(MonitorError::InvalidItemId(
            "item id must not contain control characters".into(),
        ));
    }
    Ok(())
}
