//! In-memory collaborators and time controls for tests.
//!
//! Shared by the unit tests and the integration test binary. Built only
//! for tests or with the `test-utils` feature.

use crate::monitor::clock::Clock;
use crate::monitor::retry::Sleeper;
use crate::monitor::snapshot::RequirementFields;
use crate::tracker::{
    ExtractionError, ExtractionOutcome, ExtractionWorkflow, FetchError, RequirementTracker,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Time ─────────────────────────────────────────────────────────────────────

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(at),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Sleeper that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    recorded: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        lock(&self.recorded).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.recorded).push(duration);
        tokio::task::yield_now().await;
    }
}

// ── Tracker ──────────────────────────────────────────────────────────────────

/// Tracker serving whatever content the test sets, with scripted failures.
#[derive(Debug, Default)]
pub struct ScriptedTracker {
    content: Mutex<HashMap<String, RequirementFields>>,
    queued_failures: Mutex<HashMap<String, VecDeque<FetchError>>>,
    permanent_failures: Mutex<HashMap<String, FetchError>>,
    fetches: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `fields` for `id` from now on.
    pub fn set(&self, id: &str, fields: RequirementFields) {
        lock(&self.content).insert(id.to_owned(), fields);
    }

    /// Fail the next `times` fetches of `id` with `error`.
    pub fn fail_times(&self, id: &str, times: usize, error: FetchError) {
        let mut queued = lock(&self.queued_failures);
        let queue = queued.entry(id.to_owned()).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Fail every fetch of `id` until [`Self::recover`] is called.
    pub fn fail_always(&self, id: &str, error: FetchError) {
        lock(&self.permanent_failures).insert(id.to_owned(), error);
    }

    pub fn recover(&self, id: &str) {
        lock(&self.permanent_failures).remove(id);
        lock(&self.queued_failures).remove(id);
    }

    /// Make every fetch take `delay` of real time.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    /// Number of fetch calls seen for `id`.
    pub fn fetches(&self, id: &str) -> usize {
        lock(&self.fetches).get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RequirementTracker for ScriptedTracker {
    async fn fetch(&self, id: &str) -> Result<RequirementFields, FetchError> {
        *lock(&self.fetches).entry(id.to_owned()).or_default() += 1;

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = lock(&self.permanent_failures).get(id) {
            return Err(error.clone());
        }
        let queued = lock(&self.queued_failures)
            .get_mut(id)
            .and_then(VecDeque::pop_front);
        if let Some(error) = queued {
            return Err(error);
        }
        lock(&self.content)
            .get(id)
            .cloned()
            .ok_or_else(|| FetchError::Permanent(format!("item {id} not found")))
    }
}

// ── Workflow ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum WorkflowMode {
    Succeed,
    Fail(String),
    Unavailable(String),
}

/// Workflow that records every call and answers per its current mode.
///
/// Successful runs create one story id per call, named `<id>-S<n>`.
#[derive(Debug)]
pub struct RecordingWorkflow {
    mode: Mutex<WorkflowMode>,
    calls: Mutex<Vec<String>>,
}

impl RecordingWorkflow {
    pub fn succeeding() -> Self {
        Self {
            mode: Mutex::new(WorkflowMode::Succeed),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        let workflow = Self::succeeding();
        workflow.set_failing(error);
        workflow
    }

    pub fn set_succeeding(&self) {
        *lock(&self.mode) = WorkflowMode::Succeed;
    }

    /// Report an unsuccessful outcome.
    pub fn set_failing(&self, error: &str) {
        *lock(&self.mode) = WorkflowMode::Fail(error.to_owned());
    }

    /// Fail at the transport level.
    pub fn set_unavailable(&self, error: &str) {
        *lock(&self.mode) = WorkflowMode::Unavailable(error.to_owned());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, id: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == id).count()
    }
}

#[async_trait]
impl ExtractionWorkflow for RecordingWorkflow {
    async fn extract(&self, id: &str) -> Result<ExtractionOutcome, ExtractionError> {
        let n = {
            let mut calls = lock(&self.calls);
            calls.push(id.to_owned());
            calls.iter().filter(|c| c.as_str() == id).count()
        };
        let mode = lock(&self.mode).clone();
        match mode {
            WorkflowMode::Succeed => Ok(ExtractionOutcome::created([format!("{id}-S{n}")])),
            WorkflowMode::Fail(error) => Ok(ExtractionOutcome::failed(error)),
            WorkflowMode::Unavailable(error) => Err(ExtractionError(error)),
        }
    }
}
