//! Calendar surface: where block events become visible to the recipient
//!
//! The engine only needs create / find-by-marker / delete / set-reminders /
//! exists. Concrete backends live outside this crate; the in-memory and
//! JSON-file implementations here share one [`CalendarBook`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SurfaceError;

/// An event about to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: String,
}

/// An event as stored on the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: String,
    #[serde(default)]
    pub reminders: Vec<u32>,
}

/// Notification surface consumed by the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarSurface: Send + Sync {
    /// Create an event and return its external id.
    async fn create_event(&self, draft: &EventDraft) -> Result<String, SurfaceError>;

    /// First event starting within `[from, to]` whose description contains `marker`.
    async fn find_event_by_marker(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        marker: &str,
    ) -> Result<Option<CalendarEvent>, SurfaceError>;

    /// Delete an event. Returns `false` if it was already gone.
    async fn delete_event(&self, event_id: &str) -> Result<bool, SurfaceError>;

    /// Replace the event's reminders with one popup per lead time.
    async fn set_reminders(&self, event_id: &str, lead_minutes: &[u32]) -> Result<(), SurfaceError>;

    async fn event_exists(&self, event_id: &str) -> Result<bool, SurfaceError>;
}

/// Plain event book shared by the local calendar implementations.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CalendarBook {
    next_id: u64,
    events: BTreeMap<String, CalendarEvent>,
}

impl CalendarBook {
    fn create(&mut self, draft: &EventDraft) -> String {
        self.next_id += 1;
        let id = format!("evt-{}", self.next_id);
        self.events.insert(
            id.clone(),
            CalendarEvent {
                id: id.clone(),
                title: draft.title.clone(),
                start: draft.start,
                end: draft.end,
                description: draft.description.clone(),
                reminders: Vec::new(),
            },
        );
        id
    }

    fn find(&self, from: DateTime<Utc>, to: DateTime<Utc>, marker: &str) -> Option<CalendarEvent> {
        self.events
            .values()
            .find(|e| e.start >= from && e.start <= to && e.description.contains(marker))
            .cloned()
    }

    fn delete(&mut self, event_id: &str) -> bool {
        self.events.remove(event_id).is_some()
    }

    fn set_reminders(&mut self, event_id: &str, lead_minutes: &[u32]) -> Result<(), SurfaceError> {
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| SurfaceError::NotFound(event_id.to_string()))?;
        event.reminders = lead_minutes.to_vec();
        Ok(())
    }

    fn exists(&self, event_id: &str) -> bool {
        self.events.contains_key(event_id)
    }

    pub fn events(&self) -> impl Iterator<Item = &CalendarEvent> {
        self.events.values()
    }
}

// =========================================================================
// In-memory calendar
// =========================================================================

/// Process-local calendar, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    book: Mutex<CalendarBook>,
    fail_creates: AtomicBool,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Snapshot of every event currently on the calendar.
    pub fn events(&self) -> Vec<CalendarEvent> {
        self.book
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events()
            .cloned()
            .collect()
    }

    pub fn get(&self, event_id: &str) -> Option<CalendarEvent> {
        self.book
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .get(event_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.book.lock().unwrap_or_else(|e| e.into_inner()).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete an event the way a person would, outside the engine.
    pub fn remove(&self, event_id: &str) -> bool {
        self.book
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .delete(event_id)
    }

    /// Make every subsequent `create_event` fail with a rejection.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CalendarSurface for InMemoryCalendar {
    async fn create_event(&self, draft: &EventDraft) -> Result<String, SurfaceError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(SurfaceError::Rejected(format!(
                "create refused for {:?}",
                draft.title
            )));
        }
        Ok(self
            .book
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .create(draft))
    }

    async fn find_event_by_marker(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        marker: &str,
    ) -> Result<Option<CalendarEvent>, SurfaceError> {
        Ok(self
            .book
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .find(from, to, marker))
    }

    async fn delete_event(&self, event_id: &str) -> Result<bool, SurfaceError> {
        Ok(self.remove(event_id))
    }

    async fn set_reminders(&self, event_id: &str, lead_minutes: &[u32]) -> Result<(), SurfaceError> {
        self.book
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_reminders(event_id, lead_minutes)
    }

    async fn event_exists(&self, event_id: &str) -> Result<bool, SurfaceError> {
        Ok(self
            .book
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .exists(event_id))
    }
}

// =========================================================================
// JSON file calendar
// =========================================================================

/// Calendar persisted to a local JSON file; the file is replaced after every
/// mutation, and deleting an entry from it by hand acknowledges a chain.
#[derive(Debug)]
pub struct JsonFileCalendar {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileCalendar {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SurfaceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole book.
    pub fn load(&self) -> Result<CalendarBook, SurfaceError> {
        if !self.path.exists() {
            return Ok(CalendarBook::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(CalendarBook::default());
        }
        serde_json::from_str(&raw).map_err(|e| SurfaceError::Corrupt(e.to_string()))
    }

    fn save(&self, book: &CalendarBook) -> Result<(), SurfaceError> {
        let json =
            serde_json::to_string_pretty(book).map_err(|e| SurfaceError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&CalendarBook) -> T) -> Result<T, SurfaceError> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&self.load()?))
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut CalendarBook) -> Result<T, SurfaceError>,
    ) -> Result<T, SurfaceError> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut book = self.load()?;
        let out = f(&mut book)?;
        self.save(&book)?;
        Ok(out)
    }
}

#[async_trait]
impl CalendarSurface for JsonFileCalendar {
    async fn create_event(&self, draft: &EventDraft) -> Result<String, SurfaceError> {
        self.update(|book| Ok(book.create(draft)))
    }

    async fn find_event_by_marker(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        marker: &str,
    ) -> Result<Option<CalendarEvent>, SurfaceError> {
        self.read(|book| book.find(from, to, marker))
    }

    async fn delete_event(&self, event_id: &str) -> Result<bool, SurfaceError> {
        self.update(|book| Ok(book.delete(event_id)))
    }

    async fn set_reminders(&self, event_id: &str, lead_minutes: &[u32]) -> Result<(), SurfaceError> {
        self.update(|book| book.set_reminders(event_id, lead_minutes))
    }

    async fn event_exists(&self, event_id: &str) -> Result<bool, SurfaceError> {
        self.read(|book| book.exists(event_id))
    }
}
