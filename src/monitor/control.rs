//! Control surface.
//!
//! Every operation here is safe to call while the poll loop is running:
//! they only touch the store through its named operations, and checks go
//! through the same [`Monitor::check_item`] path as the loop.

use crate::config::{MonitorConfig, MonitorConfigPatch};
use crate::error::{MonitorError, Result};
use crate::monitor::decision::CheckTrigger;
use crate::monitor::runner::{CheckReport, CheckStatus, Monitor};
use crate::monitor::state::MonitoredItemState;
use crate::monitor::status::{ItemChanges, MonitorStatus};
use tokio_util::sync::CancellationToken;
use tracing::info;

impl Monitor {
    /// Start monitoring `id`. Returns false if it was already monitored.
    ///
    /// # Errors
    /// Returns [`MonitorError::InvalidItemId`] for unusable ids.
    pub fn add_item(&self, id: &str) -> Result<bool> {
        let added = self.inner.store.insert(id)?;
        if added {
            info!(item_id = id, "item added");
            self.persist();
        }
        Ok(added)
    }

    /// Stop monitoring `id`. Returns false if it was not monitored.
    pub fn remove_item(&self, id: &str) -> Result<bool> {
        let removed = self.inner.store.remove(id)?;
        if removed {
            info!(item_id = id, "item removed");
            self.persist();
        }
        Ok(removed)
    }

    /// Check one item (or all of them) right now, outside the timer.
    ///
    /// Force-checks may bypass cooldown and cap when
    /// `manual_override_enabled` is set; the significance threshold still
    /// applies. A busy item is reported with [`CheckStatus::Busy`].
    ///
    /// # Errors
    /// Returns [`MonitorError::UnknownItem`] when a specific id is not
    /// monitored.
    pub async fn force_check(&self, id: Option<&str>) -> Result<Vec<CheckReport>> {
        let cancel = CancellationToken::new();
        match id {
            Some(id) => {
                let report = match self.check_item(id, CheckTrigger::Forced, &cancel).await {
                    Ok(report) => report,
                    Err(MonitorError::ItemBusy(_)) => CheckReport {
                        id: id.to_owned(),
                        status: CheckStatus::Busy,
                        attempts: 0,
                        significance: None,
                        changed_fields: Default::default(),
                        decision: None,
                        error: Some("a check for this item is already running".into()),
                    },
                    Err(e) => return Err(e),
                };
                Ok(vec![report])
            }
            None => self.run_cycle(CheckTrigger::Forced, &cancel).await,
        }
    }

    /// Re-run extraction for `id` regardless of significance, cooldown and
    /// cap.
    ///
    /// # Errors
    /// [`MonitorError::ManualOverrideDisabled`] when overrides are off,
    /// [`MonitorError::UnknownItem`] or [`MonitorError::ItemBusy`] when the
    /// item cannot be claimed.
    pub async fn force_reextract(&self, id: &str) -> Result<CheckReport> {
        if !self.inner.store.config()?.manual_override_enabled {
            return Err(MonitorError::ManualOverrideDisabled);
        }
        info!(item_id = id, "manual re-extraction requested");
        self.check_item(id, CheckTrigger::Reextract, &CancellationToken::new())
            .await
    }

    /// Forget that `id` was processed so its next check is a first sight.
    /// Returns false for unknown ids.
    pub fn reset_item(&self, id: &str) -> Result<bool> {
        let reset = self.inner.store.reset(id)?;
        if reset {
            info!(item_id = id, "item processed state reset");
            self.persist();
        }
        Ok(reset)
    }

    /// Run state, per-item summaries and aggregate statistics.
    pub fn status(&self) -> Result<MonitorStatus> {
        self.inner.store.status(self.run_state())
    }

    /// Change statistics for one item.
    pub fn item_changes(&self, id: &str) -> Result<ItemChanges> {
        self.inner.store.changes(id)
    }

    /// Copy of one item's full state.
    pub fn item_state(&self, id: &str) -> Result<Option<MonitoredItemState>> {
        self.inner.store.item(id)
    }

    /// Monitored ids in sorted order.
    pub fn item_ids(&self) -> Result<Vec<String>> {
        self.inner.store.ids()
    }

    /// Current configuration.
    pub fn config(&self) -> Result<MonitorConfig> {
        self.inner.store.config()
    }

    /// Merge `patch` into the configuration, all or nothing.
    ///
    /// # Errors
    /// Returns [`MonitorError::ConfigValidation`] and keeps the previous
    /// configuration when any merged field is out of range.
    pub fn update_config(&self, patch: &MonitorConfigPatch) -> Result<MonitorConfig> {
        let updated = self.inner.store.update_config(patch)?;
        info!("monitor configuration updated");
        self.persist();
        Ok(updated)
    }
}
