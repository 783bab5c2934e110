//! Chain State: the durable record of one escalation run

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::plan::Block;

/// Lifecycle of a chain record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    /// Iterating blocks
    Active,
    /// Terminal event created; the record is dropped on the next tick
    FinalCleanup,
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::FinalCleanup => write!(f, "final_cleanup"),
        }
    }
}

/// The triggering notification as handed over by the notification source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub source_id: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// What the chain is about, as shown on every event it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub received_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
}

impl SourceMeta {
    pub fn new(notification: &Notification, deadline_at: DateTime<Utc>) -> Self {
        Self {
            subject: notification.subject.clone(),
            link: notification.link.clone(),
            received_at: notification.received_at,
            deadline_at,
        }
    }
}

/// Full drive state for one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    pub chain_id: String,
    pub fingerprint: Fingerprint,
    pub source: SourceMeta,
    pub blocks: Vec<Block>,
    pub current_index: usize,
    /// Event materializing `blocks[current_index]`; cleared once the terminal
    /// event takes over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_event_id: Option<String>,
    /// Superseded event to remove on the next tick
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_delete_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_event_id: Option<String>,
    pub status: ChainStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChainState {
    /// New chain positioned on block 0, which is already materialized as
    /// `first_event_id`.
    pub fn new(
        fingerprint: Fingerprint,
        source: SourceMeta,
        blocks: Vec<Block>,
        first_event_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            chain_id: uuid::Uuid::new_v4().to_string(),
            fingerprint,
            source,
            blocks,
            current_index: 0,
            current_event_id: Some(first_event_id),
            pending_delete_event_id: None,
            final_event_id: None,
            status: ChainStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current_block(&self) -> Option<&Block> {
        self.blocks.get(self.current_index)
    }

    pub fn next_block(&self) -> Option<&Block> {
        self.blocks.get(self.current_index + 1)
    }

    pub fn has_next_block(&self) -> bool {
        self.current_index + 1 < self.blocks.len()
    }

    /// Move onto the next block, now materialized as `new_event_id`. The old
    /// current event becomes pending-delete.
    pub fn advance(&mut self, new_event_id: String, now: DateTime<Utc>) {
        self.pending_delete_event_id = self.current_event_id.replace(new_event_id);
        self.current_index += 1;
        self.updated_at = now;
    }

    /// Hand over to the terminal event; the last block event becomes
    /// pending-delete.
    pub fn enter_final_cleanup(&mut self, final_event_id: String, now: DateTime<Utc>) {
        self.pending_delete_event_id = self.current_event_id.take();
        self.final_event_id = Some(final_event_id);
        self.status = ChainStatus::FinalCleanup;
        self.updated_at = now;
    }

    /// Get a summary for logging
    pub fn summary(&self) -> String {
        format!(
            "fingerprint={} chain={} status={} block={}/{} current={} pending_delete={}",
            self.fingerprint,
            self.chain_id,
            self.status,
            self.current_index + 1,
            self.blocks.len(),
            self.current_event_id.as_deref().unwrap_or("-"),
            self.pending_delete_event_id.as_deref().unwrap_or("-"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample() -> ChainState {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap();
        let blocks = (1..=3)
            .map(|i| Block {
                start: t0 + Duration::hours(i),
                lead_minutes: vec![0],
            })
            .collect();
        let source = SourceMeta {
            subject: "Your one-time code".into(),
            link: None,
            received_at: t0,
            deadline_at: t0 + Duration::hours(5),
        };
        ChainState::new(
            Fingerprint::from_raw("LIVE-202604011000-deadbeef"),
            source,
            blocks,
            "evt-1".into(),
            t0,
        )
    }

    #[test]
    fn test_new_chain_state() {
        let state = sample();
        assert_eq!(state.status, ChainStatus::Active);
        assert_eq!(state.current_index, 0);
        assert_eq!(state.current_event_id.as_deref(), Some("evt-1"));
        assert!(state.pending_delete_event_id.is_none());
        assert!(state.has_next_block());
    }

    #[test]
    fn test_advance_rotates_ids() {
        let mut state = sample();
        let now = Utc::now();
        state.advance("evt-2".into(), now);
        assert_eq!(state.current_index, 1);
        assert_eq!(state.current_event_id.as_deref(), Some("evt-2"));
        assert_eq!(state.pending_delete_event_id.as_deref(), Some("evt-1"));
        assert_eq!(state.updated_at, now);

        state.advance("evt-3".into(), now);
        assert!(!state.has_next_block());
        assert!(state.next_block().is_none());
    }

    #[test]
    fn test_enter_final_cleanup() {
        let mut state = sample();
        state.enter_final_cleanup("evt-final".into(), Utc::now());
        assert_eq!(state.status, ChainStatus::FinalCleanup);
        assert!(state.current_event_id.is_none());
        assert_eq!(state.pending_delete_event_id.as_deref(), Some("evt-1"));
        assert_eq!(state.final_event_id.as_deref(), Some("evt-final"));
    }

    #[test]
    fn test_optional_ids_are_omitted_and_defaulted() {
        let state = sample();
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("pending_delete_event_id").is_none());
        assert_eq!(json["status"], "ACTIVE");

        let back: ChainState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
