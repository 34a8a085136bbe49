//! Change-aware monitoring scheduler.
//!
//! Polls monitored requirement items, scores content changes and decides
//! when to invoke the extraction workflow.

pub mod clock;
mod control;
pub mod decision;
pub mod retry;
pub mod runner;
pub mod scoring;
pub mod snapshot;
pub mod state;
pub mod status;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use decision::{CheckTrigger, Decision};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use runner::{CheckReport, CheckStatus, Monitor, MonitorBuilder, RunState};
pub use scoring::{ChangedField, ScoreOutcome};
pub use snapshot::{RequirementFields, RequirementSnapshot};
pub use state::{ItemPhase, MonitoredItemState};
pub use status::{ItemChanges, ItemSummary, MonitorStatistics, MonitorStatus};
pub use store::ItemStore;
