//! deadline-watch
//!
//! Command-line driver for the `escalation` engine. Chains and the recurring
//! trigger live in one JSON key-value file; events go to a JSON calendar file.
//!
//! # Usage
//!
//! ```bash
//! # Start escalating a notification
//! deadline-watch start --source-id msg-42 --subject "Login code"
//!
//! # One driver pass (e.g. from cron)
//! deadline-watch tick
//!
//! # Long-running: tick whenever the trigger is due
//! RUST_LOG=deadline_watch=debug deadline-watch run --poll-seconds 30
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod cli;
pub mod commands;
pub mod lock;

pub use cli::{Args, Command, Paths};
pub use commands::{render_status, ChainRow, StartRequest, Watch};
pub use lock::RunLock;
