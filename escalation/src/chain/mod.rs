//! Chain persistence
//!
//! One durable [`ChainState`] record per fingerprint, stored as JSON in any
//! [`KeyValueStore`] under the `escalation:chain:` namespace. Records are
//! always replaced whole, so a crash mid-tick loses at most that tick.

pub mod schema;
pub mod state;
pub mod store;

pub use state::{ChainState, ChainStatus, Notification, SourceMeta};
pub use store::{ChainStateStore, JsonFileKv, KeyValueStore, MemoryKv, StoreError, StoreResult};
