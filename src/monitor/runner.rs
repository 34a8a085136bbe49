//! Monitor background loop.
//!
//! [`Monitor`] owns the poll loop and the shared check path. The loop runs
//! in a spawned tokio task; each cycle snapshots the id list, checks every
//! item (with bounded concurrency) and then waits out the rest of the poll
//! interval. `stop()` cancels a token that the inter-cycle wait and the
//! retry backoff both race against, so it takes effect without waiting a
//! full interval. Force-checks from the control surface go through the same
//! [`Monitor::check_item`] path as scheduled checks.

use crate::error::{MonitorError, Result};
use crate::monitor::clock::{Clock, SystemClock};
use crate::monitor::decision::{CheckTrigger, Decision, decide};
use crate::monitor::retry::{RetryError, Sleeper, TokioSleeper, fetch_with_retry};
use crate::monitor::scoring::{ChangedField, score};
use crate::monitor::snapshot::RequirementSnapshot;
use crate::monitor::store::{CheckWriteBack, ExtractionAttempt, ItemStore};
use crate::persist::{self, MonitorDocument};
use crate::tracker::{ExtractionWorkflow, RequirementTracker};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Stopped,
    Running,
    Stopping,
}

/// How a single check ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Fetched and decided; no extraction ran.
    Checked,
    /// Extraction ran and succeeded.
    Extracted,
    /// Extraction ran and failed.
    ExtractionFailed,
    /// Fetch failed permanently or retries ran out.
    FetchFailed,
    /// `stop()` interrupted the retry backoff.
    Cancelled,
    /// Another check held the item.
    Busy,
    /// The item was removed while the check ran.
    Removed,
}

/// Outcome of checking one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub id: String,
    pub status: CheckStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significance: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub changed_fields: BTreeSet<ChangedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckReport {
    fn bare(id: &str, status: CheckStatus, attempts: u32) -> Self {
        Self {
            id: id.to_owned(),
            status,
            attempts,
            significance: None,
            changed_fields: BTreeSet::new(),
            decision: None,
            error: None,
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: RunState,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

pub(crate) struct MonitorInner {
    pub(crate) store: Arc<ItemStore>,
    tracker: Arc<dyn RequirementTracker>,
    workflow: Arc<dyn ExtractionWorkflow>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    document_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
}

impl MonitorInner {
    fn mark_stopped(&self) {
        match self.lifecycle.lock() {
            Ok(mut lifecycle) => {
                lifecycle.state = RunState::Stopped;
                info!("monitor stopped");
            }
            Err(_) => error!("lifecycle lock poisoned, monitor left stopping"),
        }
    }
}

/// Change-aware monitoring scheduler.
///
/// Cheap to clone; all clones share one store and one background loop.
#[derive(Clone)]
pub struct Monitor {
    pub(crate) inner: Arc<MonitorInner>,
}

/// Builder for [`Monitor`].
pub struct MonitorBuilder {
    store: ItemStore,
    tracker: Arc<dyn RequirementTracker>,
    workflow: Arc<dyn ExtractionWorkflow>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    document_path: Option<PathBuf>,
}

impl MonitorBuilder {
    /// Start from an in-memory store.
    pub fn new(
        store: ItemStore,
        tracker: Arc<dyn RequirementTracker>,
        workflow: Arc<dyn ExtractionWorkflow>,
    ) -> Self {
        Self {
            store,
            tracker,
            workflow,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            document_path: None,
        }
    }

    /// Load the document at `path` (default when absent) and persist every
    /// later mutation back to it.
    ///
    /// # Errors
    /// Returns the load error for unreadable or invalid documents.
    pub fn from_document_path(
        path: PathBuf,
        tracker: Arc<dyn RequirementTracker>,
        workflow: Arc<dyn ExtractionWorkflow>,
    ) -> Result<Self> {
        let document = persist::load_document(&path)?;
        info!(
            items = document.item_ids.len(),
            "loaded monitor document from {}",
            path.display()
        );
        let mut builder = Self::new(ItemStore::from_document(document), tracker, workflow);
        builder.document_path = Some(path);
        Ok(builder)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_document_path(mut self, path: PathBuf) -> Self {
        self.document_path = Some(path);
        self
    }

    pub fn build(self) -> Monitor {
        Monitor {
            inner: Arc::new(MonitorInner {
                store: Arc::new(self.store),
                tracker: self.tracker,
                workflow: self.workflow,
                clock: self.clock,
                sleeper: self.sleeper,
                document_path: self.document_path,
                persist_lock: Mutex::new(()),
                lifecycle: Mutex::new(Lifecycle {
                    state: RunState::Stopped,
                    cancel: None,
                    handle: None,
                }),
            }),
        }
    }
}

impl Monitor {
    /// Shorthand for [`MonitorBuilder::new`].
    pub fn builder(
        store: ItemStore,
        tracker: Arc<dyn RequirementTracker>,
        workflow: Arc<dyn ExtractionWorkflow>,
    ) -> MonitorBuilder {
        MonitorBuilder::new(store, tracker, workflow)
    }

    fn lifecycle(&self) -> Result<std::sync::MutexGuard<'_, Lifecycle>> {
        self.inner
            .lifecycle
            .lock()
            .map_err(|_| MonitorError::Internal("lifecycle lock poisoned".into()))
    }

    /// Current lifecycle state.
    pub fn run_state(&self) -> RunState {
        self.lifecycle()
            .map(|l| l.state)
            .unwrap_or(RunState::Stopped)
    }

    /// Spawn the background loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`MonitorError::SchedulerState`] unless the monitor is
    /// `STOPPED`.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle()?;
        if lifecycle.state != RunState::Stopped {
            return Err(MonitorError::SchedulerState(format!(
                "cannot start: monitor is {:?}",
                lifecycle.state
            )));
        }

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { run_loop(inner, token).await });

        lifecycle.state = RunState::Running;
        lifecycle.cancel = Some(cancel);
        lifecycle.handle = Some(handle);
        info!("monitor started");
        Ok(())
    }

    /// Stop the background loop and wait for it to exit.
    ///
    /// An upstream call already in flight is allowed to finish. The join
    /// and the final `STOPPED` transition run in their own task, so
    /// dropping this future early still lets the monitor settle.
    ///
    /// # Errors
    /// Returns [`MonitorError::SchedulerState`] unless the monitor is
    /// `RUNNING`.
    pub async fn stop(&self) -> Result<()> {
        let (cancel, handle) = {
            let mut lifecycle = self.lifecycle()?;
            if lifecycle.state != RunState::Running {
                return Err(MonitorError::SchedulerState(format!(
                    "cannot stop: monitor is {:?}",
                    lifecycle.state
                )));
            }
            lifecycle.state = RunState::Stopping;
            (lifecycle.cancel.take(), lifecycle.handle.take())
        };

        info!("monitor stopping");
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let inner = Arc::clone(&self.inner);
        let finish = tokio::spawn(async move {
            if let Some(handle) = handle
                && let Err(e) = handle.await
            {
                error!("monitor loop ended abnormally: {e}");
            }
            inner.mark_stopped();
        });
        if let Err(e) = finish.await {
            error!("monitor stop task failed: {e}");
            self.inner.mark_stopped();
        }
        Ok(())
    }

    /// Check every monitored item once.
    ///
    /// Items already being checked elsewhere are reported as
    /// [`CheckStatus::Busy`]. One item's failure never affects the others.
    pub async fn run_cycle(
        &self,
        trigger: CheckTrigger,
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckReport>> {
        let ids = self.inner.store.ids()?;
        let limit = self.inner.store.config()?.max_concurrent_checks.max(1);
        debug!(items = ids.len(), limit, ?trigger, "poll cycle started");

        let mut reports: Vec<CheckReport> = futures_util::stream::iter(ids)
            .map(|id| async move {
                match self.check_item(&id, trigger, cancel).await {
                    Ok(report) => report,
                    Err(MonitorError::ItemBusy(_)) => {
                        debug!(item_id = %id, "check skipped, item busy");
                        CheckReport::bare(&id, CheckStatus::Busy, 0)
                    }
                    Err(MonitorError::UnknownItem(_)) => {
                        CheckReport::bare(&id, CheckStatus::Removed, 0)
                    }
                    Err(e) => {
                        error!(item_id = %id, "check failed: {e}");
                        let mut report = CheckReport::bare(&id, CheckStatus::FetchFailed, 0);
                        report.error = Some(e.to_string());
                        report
                    }
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        reports.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(reports)
    }

    /// Fetch, score, decide and (optionally) extract one item.
    ///
    /// # Errors
    /// [`MonitorError::UnknownItem`] or [`MonitorError::ItemBusy`] when the
    /// item cannot be claimed; upstream failures are recorded in the item
    /// state and reported, never returned as errors.
    pub async fn check_item(
        &self,
        id: &str,
        trigger: CheckTrigger,
        cancel: &CancellationToken,
    ) -> Result<CheckReport> {
        let inner = &self.inner;
        let (lease, context) = inner.store.begin_check(id)?;
        let policy = context.config.retry_policy();
        let tracker = Arc::clone(&inner.tracker);

        let mut last_attempt = 0u32;
        let fetched = fetch_with_retry(&policy, inner.sleeper.as_ref(), cancel, id, |attempt| {
            last_attempt = attempt;
            tracker.fetch(id)
        })
        .await;
        let checked_at = inner.clock.now();

        let (fields, attempts) = match fetched {
            Ok(fields) => (fields, last_attempt + 1),
            Err(RetryError::Cancelled { attempts }) => {
                inner
                    .store
                    .record_fetch_failure(&lease, checked_at, "check cancelled", 0)?;
                return Ok(CheckReport::bare(id, CheckStatus::Cancelled, attempts));
            }
            Err(RetryError::Failed { attempts, error }) => {
                let detail = error.to_string();
                inner
                    .store
                    .record_fetch_failure(&lease, checked_at, &detail, attempts)?;
                let mut report = CheckReport::bare(id, CheckStatus::FetchFailed, attempts);
                report.error = Some(detail);
                return Ok(report);
            }
        };

        let snapshot = RequirementSnapshot::capture(id, fields);
        let outcome = score(context.previous.as_ref(), &snapshot, &context.config);
        let decision = decide(&context.input, &context.config, &outcome, checked_at, trigger);
        debug!(
            item_id = id,
            significance = outcome.significance,
            extract = decision.extract,
            reason = %decision.reason,
            "decision"
        );

        let extraction = match (decision.extract, decision.kind) {
            (true, Some(kind)) => {
                let result = inner.workflow.extract(id).await;
                Some(ExtractionAttempt {
                    kind,
                    finished_at: inner.clock.now(),
                    result,
                })
            }
            _ => None,
        };

        let status = match &extraction {
            Some(attempt) if attempt.succeeded() => CheckStatus::Extracted,
            Some(_) => CheckStatus::ExtractionFailed,
            None => CheckStatus::Checked,
        };
        let error = extraction.as_ref().and_then(|attempt| match &attempt.result {
            Ok(outcome) if !outcome.success => outcome
                .error
                .clone()
                .or_else(|| Some("extraction workflow reported failure".to_owned())),
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        });

        let mut report = CheckReport {
            id: id.to_owned(),
            status,
            attempts,
            significance: Some(outcome.significance),
            changed_fields: outcome.changed_fields.clone(),
            decision: Some(decision.clone()),
            error,
        };

        let effect = inner.store.record_check(
            &lease,
            CheckWriteBack {
                checked_at,
                snapshot,
                outcome,
                decision,
                extraction,
            },
        )?;
        if !effect.applied {
            report.status = CheckStatus::Removed;
        }
        if effect.processed_changed {
            self.persist();
        }
        Ok(report)
    }

    /// Save the document if the monitor is bound to a path. Failures are
    /// logged, never returned.
    pub(crate) fn persist(&self) {
        let Some(path) = &self.inner.document_path else {
            return;
        };
        let _guard = match self.inner.persist_lock.lock() {
            Ok(guard) => guard,
            Err(_) => {
                error!("persist lock poisoned, skipping save");
                return;
            }
        };
        let result = self
            .inner
            .store
            .document()
            .and_then(|document: MonitorDocument| persist::save_document(path, &document));
        if let Err(e) = result {
            error!("cannot persist monitor document: {e}");
        }
    }
}

async fn run_loop(inner: Arc<MonitorInner>, cancel: CancellationToken) {
    let monitor = Monitor { inner };
    loop {
        let started = Instant::now();

        match monitor.run_cycle(CheckTrigger::Scheduled, &cancel).await {
            Ok(reports) => {
                let failed = reports
                    .iter()
                    .filter(|r| r.status == CheckStatus::FetchFailed)
                    .count();
                let extracted = reports
                    .iter()
                    .filter(|r| r.status == CheckStatus::Extracted)
                    .count();
                info!(
                    checked = reports.len(),
                    extracted,
                    failed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "poll cycle complete"
                );
            }
            Err(e) => error!("poll cycle aborted: {e}"),
        }

        if cancel.is_cancelled() {
            break;
        }

        let interval = match monitor.inner.store.config() {
            Ok(config) => config.poll_interval(),
            Err(e) => {
                warn!("cannot read poll interval, using default: {e}");
                crate::config::MonitorConfig::default().poll_interval()
            }
        };
        let remaining = interval.saturating_sub(started.elapsed());

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = monitor.inner.sleeper.sleep(remaining) => {}
        }
    }
    debug!("monitor loop exited");
}
