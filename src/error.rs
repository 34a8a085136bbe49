//! Error types for the reqwatch monitor.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`MonitorError::code()`].
//! The control plane reports these codes verbatim.

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// A configuration update or document failed validation.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// The referenced item is not monitored.
    pub const UNKNOWN_ITEM: &str = "UNKNOWN_ITEM";

    /// The item id is empty or otherwise unusable.
    pub const INVALID_ITEM_ID: &str = "INVALID_ITEM_ID";

    /// Another check currently owns the item.
    pub const ITEM_BUSY: &str = "ITEM_BUSY";

    /// The requested operation needs `manual_override_enabled`.
    pub const OVERRIDE_DISABLED: &str = "OVERRIDE_DISABLED";

    /// The scheduler refused a lifecycle transition.
    pub const SCHEDULER_STATE: &str = "SCHEDULER_STATE";

    /// Reading or writing the monitor document failed.
    pub const PERSIST_FAILED: &str = "PERSIST_FAILED";

    /// Internal failure (poisoned lock, bind failure).
    pub const INTERNAL: &str = "INTERNAL";
}

/// Top-level error type for the monitor.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Configuration validation failed; the previous config is untouched.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    ConfigValidation(String),

    /// The item id is not in the store.
    #[error("[{}] item '{}' is not monitored", error_codes::UNKNOWN_ITEM, .0)]
    UnknownItem(String),

    /// Rejected item id.
    #[error("[{}] {}", error_codes::INVALID_ITEM_ID, .0)]
    InvalidItemId(String),

    /// A check for the item is already running.
    #[error("[{}] item '{}' is already being checked", error_codes::ITEM_BUSY, .0)]
    ItemBusy(String),

    /// Manual override is switched off in the configuration.
    #[error("[{}] manual override is disabled", error_codes::OVERRIDE_DISABLED)]
    ManualOverrideDisabled,

    /// Lifecycle transition refused (already running, not running).
    #[error("[{}] {}", error_codes::SCHEDULER_STATE, .0)]
    SchedulerState(String),

    /// Monitor document persistence error.
    #[error("[{}] {}", error_codes::PERSIST_FAILED, .0)]
    Persist(String),

    /// Unexpected internal failure.
    #[error("[{}] {}", error_codes::INTERNAL, .0)]
    Internal(String),
}

impl MonitorError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigValidation(_) => error_codes::CONFIG_INVALID,
            Self::UnknownItem(_) => error_codes::UNKNOWN_ITEM,
            Self::InvalidItemId(_) => error_codes::INVALID_ITEM_ID,
            Self::ItemBusy(_) => error_codes::ITEM_BUSY,
            Self::ManualOverrideDisabled => error_codes::OVERRIDE_DISABLED,
            Self::SchedulerState(_) => error_codes::SCHEDULER_STATE,
            Self::Persist(_) => error_codes::PERSIST_FAILED,
            Self::Internal(_) => error_codes::INTERNAL,
        }
    }

    /// Returns true when the failure is an expected, caller-facing outcome
    /// rather than an internal fault.
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::Persist(_) | Self::Internal(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, MonitorError>;
