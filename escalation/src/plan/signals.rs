//! Signal Planner: reminder instants for one escalation window

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::policy::QuietWindow;

/// Produces the ordered reminder instants between a window start and a deadline.
#[derive(Debug, Clone, Copy)]
pub struct SignalPlanner {
    policy: QuietWindow,
    interval_hours: u32,
}

impl SignalPlanner {
    pub fn new(policy: QuietWindow, interval_hours: u32) -> Self {
        Self {
            policy,
            interval_hours: interval_hours.max(1),
        }
    }

    pub fn policy(&self) -> &QuietWindow {
        &self.policy
    }

    /// Plan every signal for the window.
    ///
    /// Steps from the first whole hour at least one hour after `window_start`,
    /// dropping quiet instants, up to `deadline - 1h`. That last instant is
    /// appended when it is not quiet and the stepping did not land on it, so
    /// the final hour before the deadline is always covered, even when the
    /// window is shorter than an hour and that instant precedes `window_start`.
    /// An empty result means there is nothing to escalate.
    pub fn plan(&self, window_start: DateTime<Utc>, deadline: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let raw_end = deadline - Duration::hours(1);
        let end_signal = raw_end
            .duration_trunc(Duration::minutes(1))
            .unwrap_or(raw_end);
        let step = Duration::hours(i64::from(self.interval_hours));

        let mut signals = Vec::new();
        let mut t = self
            .policy
            .round_up_to_boundary(window_start + Duration::hours(1), 60);
        while t <= end_signal {
            if !self.policy.is_quiet(t) {
                signals.push(t);
            }
            t += step;
        }

        let covered = signals.last().is_some_and(|last| *last >= end_signal);
        if !covered && !self.policy.is_quiet(end_signal) {
            signals.push(end_signal);
        }
        signals
    }
}
