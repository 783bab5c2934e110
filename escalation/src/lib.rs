//! Escalating Reminder Engine
//!
//! Turns a time-sensitive notification into a chain of calendar events that
//! keep reminding until a person deletes one of them or the validity deadline
//! passes.
//!
//! # Components
//!
//! ## Planning (pure)
//! - [`policy::QuietWindow`]: local-time hours in which nobody is disturbed
//! - [`plan::SignalPlanner`]: hourly signal instants between arrival and deadline
//! - [`plan::pack_blocks`]: groups signals into events carrying several reminders
//!
//! ## Persistence
//! - [`chain::ChainStateStore`]: one JSON record per active chain, keyed by
//!   [`Fingerprint`]
//! - [`chain::KeyValueStore`]: pluggable backend (`MemoryKv`, `JsonFileKv`)
//!
//! ## Driving
//! - [`driver::ChainDriver`]: `start_chain` and the periodic `tick`
//! - [`resolver::DuplicateResolver`]: marker-based idempotent event creation
//! - [`trigger::TriggerLifecycle`]: keeps the tick scheduled only while chains exist
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use escalation::{
//!     ChainDriver, EscalationConfig, EscalationWindow, Fingerprint, InMemoryCalendar,
//!     InMemoryScheduler, MemoryKv, Notification, RunMode,
//! };
//!
//! # async fn demo() -> escalation::EscalationResult<()> {
//! let config = EscalationConfig::from_env();
//! let driver = ChainDriver::new(
//!     config.clone(),
//!     Arc::new(InMemoryCalendar::new()),
//!     Arc::new(MemoryKv::new()),
//!     Arc::new(InMemoryScheduler::new()),
//! )?;
//!
//! let notification = Notification {
//!     source_id: "msg-42".into(),
//!     subject: "Your login code".into(),
//!     link: None,
//!     received_at: Utc::now(),
//! };
//! let fp = Fingerprint::derive(RunMode::Live, &notification.source_id, notification.received_at, Utc::now());
//! let window = EscalationWindow::for_notification(notification.received_at, &config)?;
//! driver.start_chain(&fp, &notification, window.start, window.deadline).await?;
//! driver.tick().await?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod audit;
pub mod chain;
pub mod config;
pub mod driver;
pub mod error;
pub mod fingerprint;
pub mod plan;
pub mod policy;
pub mod resolver;
pub mod retry;
pub mod surface;
pub mod trigger;

pub use audit::{AuditRecord, AuditSink, JsonlAudit, NullAudit};
pub use chain::{
    ChainState, ChainStateStore, ChainStatus, JsonFileKv, KeyValueStore, MemoryKv, Notification,
    SourceMeta, StoreError, StoreResult,
};
pub use config::EscalationConfig;
pub use driver::{ChainDriver, ChainOutcome, ChainReport, StartOutcome, TickReport};
pub use error::{EscalationError, EscalationResult, RetryCategory, SurfaceError};
pub use fingerprint::{Fingerprint, RunMode};
pub use plan::{pack_blocks, Block, EscalationWindow, SignalPlanner};
pub use policy::QuietWindow;
pub use resolver::{block_marker, final_marker, DuplicateResolver, EnsuredEvent, MARKER_TAG};
pub use retry::RetryPolicy;
pub use surface::{
    CalendarBook, CalendarEvent, CalendarSurface, EventDraft, InMemoryCalendar, InMemoryScheduler,
    JsonFileCalendar, KvScheduler, RecurringJob, RecurringScheduler,
};
pub use trigger::{TriggerLifecycle, CHAIN_DRIVER_HANDLER};
