//! Escalation planning: signal generation and block packing
//!
//! ```text
//! window start ──► SignalPlanner ──► [s0, s1, … sn]   (hourly, quiet hours dropped,
//!                                                      deadline − 1h always kept)
//!                        │
//!                        ▼
//!                  pack_blocks ──► [Block{start: s4, lead: [240,180,120,60,0]}, …]
//! ```
//!
//! Both stages are pure. The chain driver persists the packed plan once and
//! never re-plans a running chain.

pub mod blocks;
pub mod signals;

pub use blocks::{pack_blocks, Block};
pub use signals::SignalPlanner;

use chrono::{DateTime, Duration, Utc};

use crate::config::EscalationConfig;
use crate::error::{EscalationError, EscalationResult};

/// The span a chain escalates over: signals start after `start`, the
/// terminal reminder lands on `deadline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationWindow {
    pub start: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl EscalationWindow {
    pub fn new(start: DateTime<Utc>, deadline: DateTime<Utc>) -> EscalationResult<Self> {
        if deadline <= start {
            return Err(EscalationError::InvalidWindow { start, deadline });
        }
        Ok(Self { start, deadline })
    }

    /// Window for a notification received at `received_at`, valid for the
    /// configured number of hours.
    pub fn for_notification(
        received_at: DateTime<Utc>,
        config: &EscalationConfig,
    ) -> EscalationResult<Self> {
        Self::new(
            received_at,
            received_at + Duration::hours(i64::from(config.validity_hours)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_rejects_inverted_range() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        assert!(EscalationWindow::new(t, t).is_err());
        assert!(EscalationWindow::new(t, t - Duration::minutes(1)).is_err());
        assert!(EscalationWindow::new(t, t + Duration::minutes(1)).is_ok());
    }

    #[test]
    fn test_window_for_notification_uses_validity() {
        let config = EscalationConfig {
            validity_hours: 23,
            ..Default::default()
        };
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let window = EscalationWindow::for_notification(t, &config).unwrap();
        assert_eq!(window.deadline, Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap());
    }
}
