//! Trigger Lifecycle Manager: keeps the chain driver scheduled exactly while
//! there is work for it.

use std::sync::Arc;

use tracing::info;

use crate::chain::ChainStateStore;
use crate::error::EscalationResult;
use crate::surface::RecurringScheduler;

/// Handler name the chain driver is registered under.
pub const CHAIN_DRIVER_HANDLER: &str = "escalation_tick";

#[derive(Clone)]
pub struct TriggerLifecycle {
    scheduler: Arc<dyn RecurringScheduler>,
    every_hours: u32,
}

impl TriggerLifecycle {
    pub fn new(scheduler: Arc<dyn RecurringScheduler>, every_hours: u32) -> Self {
        Self {
            scheduler,
            every_hours: every_hours.max(1),
        }
    }

    pub fn is_armed(&self) -> EscalationResult<bool> {
        Ok(self
            .scheduler
            .list_recurring()?
            .iter()
            .any(|h| h == CHAIN_DRIVER_HANDLER))
    }

    /// Arm the recurring tick if it is not already. Returns `true` when it
    /// was newly armed.
    pub fn ensure(&self) -> EscalationResult<bool> {
        if self.is_armed()? {
            return Ok(false);
        }
        self.scheduler
            .ensure_recurring(CHAIN_DRIVER_HANDLER, self.every_hours)?;
        info!(
            handler = CHAIN_DRIVER_HANDLER,
            every_hours = self.every_hours,
            "Armed chain driver trigger"
        );
        Ok(true)
    }

    /// Disarm the recurring tick once no chain remains. Returns `true` when
    /// it was removed by this call.
    pub fn cleanup(&self, store: &ChainStateStore) -> EscalationResult<bool> {
        if !store.is_empty()? || !self.is_armed()? {
            return Ok(false);
        }
        self.scheduler.cancel_recurring(CHAIN_DRIVER_HANDLER)?;
        info!(handler = CHAIN_DRIVER_HANDLER, "No chains left, disarmed trigger");
        Ok(true)
    }
}
