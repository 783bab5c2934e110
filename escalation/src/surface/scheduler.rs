//! Periodic scheduler: recurring invocations of named handlers

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chain::schema::{self, RECURRING_PREFIX};
use crate::chain::store::{KeyValueStore, StoreError};
use crate::error::SurfaceError;

/// Recurring-job collaborator consumed by the trigger lifecycle manager.
pub trait RecurringScheduler: Send + Sync {
    /// Register `handler` to run every `every_hours`; a no-op if already registered.
    fn ensure_recurring(&self, handler: &str, every_hours: u32) -> Result<(), SurfaceError>;
    fn list_recurring(&self) -> Result<Vec<String>, SurfaceError>;
    /// Removing an unknown handler is not an error.
    fn cancel_recurring(&self, handler: &str) -> Result<(), SurfaceError>;
}

// =========================================================================
// In-memory scheduler
// =========================================================================

/// Registration table only; nothing is ever invoked.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    jobs: Mutex<BTreeMap<String, u32>>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn every_hours(&self, handler: &str) -> Option<u32> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(handler)
            .copied()
    }
}

impl RecurringScheduler for InMemoryScheduler {
    fn ensure_recurring(&self, handler: &str, every_hours: u32) -> Result<(), SurfaceError> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(handler.to_string())
            .or_insert(every_hours);
        Ok(())
    }

    fn list_recurring(&self) -> Result<Vec<String>, SurfaceError> {
        Ok(self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect())
    }

    fn cancel_recurring(&self, handler: &str) -> Result<(), SurfaceError> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(handler);
        Ok(())
    }
}

// =========================================================================
// Key-value backed scheduler
// =========================================================================

/// A persisted recurring registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringJob {
    pub handler: String,
    pub every_hours: u32,
    pub next_due: DateTime<Utc>,
}

/// Recurring registrations stored next to the chain records. A host loop
/// polls [`KvScheduler::due_handlers`] and reports back with
/// [`KvScheduler::mark_ran`].
#[derive(Clone)]
pub struct KvScheduler {
    kv: Arc<dyn KeyValueStore>,
}

impl KvScheduler {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn job(&self, handler: &str) -> Result<Option<RecurringJob>, SurfaceError> {
        let key = schema::keys::recurring(handler);
        match self.kv.get(&key)? {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                SurfaceError::Store(StoreError::Deserialization {
                    key,
                    message: e.to_string(),
                })
            }),
            None => Ok(None),
        }
    }

    fn put(&self, job: &RecurringJob) -> Result<(), SurfaceError> {
        let json = serde_json::to_string(job)
            .map_err(|e| SurfaceError::Store(StoreError::Serialization(e.to_string())))?;
        self.kv.set(&schema::keys::recurring(&job.handler), &json)?;
        Ok(())
    }

    /// Register with an explicit first due time.
    pub fn ensure_recurring_at(
        &self,
        handler: &str,
        every_hours: u32,
        first_due: DateTime<Utc>,
    ) -> Result<(), SurfaceError> {
        if self.job(handler)?.is_some() {
            return Ok(());
        }
        debug!(handler, every_hours, next_due = %first_due, "Registering recurring job");
        self.put(&RecurringJob {
            handler: handler.to_string(),
            every_hours: every_hours.max(1),
            next_due: first_due,
        })
    }

    /// Handlers whose next due time has arrived.
    pub fn due_handlers(&self, now: DateTime<Utc>) -> Result<Vec<String>, SurfaceError> {
        let mut due = Vec::new();
        for handler in self.list_recurring()? {
            if let Some(job) = self.job(&handler)? {
                if job.next_due <= now {
                    due.push(job.handler);
                }
            }
        }
        Ok(due)
    }

    /// Push the handler's next due time one period past `now`. Unknown
    /// handlers (e.g. cancelled during the run) are ignored.
    pub fn mark_ran(&self, handler: &str, now: DateTime<Utc>) -> Result<(), SurfaceError> {
        if let Some(mut job) = self.job(handler)? {
            job.next_due = now + Duration::hours(i64::from(job.every_hours));
            self.put(&job)?;
        }
        Ok(())
    }
}

impl RecurringScheduler for KvScheduler {
    fn ensure_recurring(&self, handler: &str, every_hours: u32) -> Result<(), SurfaceError> {
        self.ensure_recurring_at(
            handler,
            every_hours,
            Utc::now() + Duration::hours(i64::from(every_hours.max(1))),
        )
    }

    fn list_recurring(&self) -> Result<Vec<String>, SurfaceError> {
        Ok(self
            .kv
            .list_keys_with_prefix(RECURRING_PREFIX)?
            .iter()
            .filter_map(|key| schema::keys::parse_recurring(key))
            .map(str::to_string)
            .collect())
    }

    fn cancel_recurring(&self, handler: &str) -> Result<(), SurfaceError> {
        self.kv.delete(&schema::keys::recurring(handler))?;
        Ok(())
    }
}
