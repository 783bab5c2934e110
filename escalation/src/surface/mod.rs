//! External collaborators the engine drives
//!
//! - [`CalendarSurface`]: where block events are materialized
//! - [`RecurringScheduler`]: periodic invocation of the chain driver
//!
//! The durable key-value store lives in [`crate::chain::store`].

pub mod calendar;
pub mod scheduler;

pub use calendar::{
    CalendarBook, CalendarEvent, CalendarSurface, EventDraft, InMemoryCalendar, JsonFileCalendar,
};
pub use scheduler::{InMemoryScheduler, KvScheduler, RecurringJob, RecurringScheduler};
