//! Quiet-window policy: pure clock arithmetic, no state.
//!
//! The quiet window is a daily range of local hours during which no reminder
//! signal may fire. A window whose start hour is greater than its end hour
//! wraps midnight (23:00–07:00 covers `[23, 24) ∪ [0, 7)`); an equal start and
//! end hour means there is no quiet window at all.
//!
//! A start hour below the end hour is a plain same-day range: 09:00–17:00
//! covers `[9, 17)` only. It is not read as the wrap-around union
//! `[9, 24) ∪ [0, 17)`, which would silence every hour of the day.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{EscalationError, EscalationResult};

/// Daily quiet window evaluated in a fixed IANA timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    start_hour: u32,
    end_hour: u32,
    tz: Tz,
}

impl QuietWindow {
    /// Create a quiet window from `start_hour` (inclusive) to `end_hour` (exclusive).
    pub fn new(start_hour: u32, end_hour: u32, tz: Tz) -> EscalationResult<Self> {
        if start_hour >= 24 || end_hour >= 24 {
            return Err(EscalationError::config(format!(
                "quiet window hours must be in 0..24 (got {}..{})",
                start_hour, end_hour
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
            tz,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Whether `t` falls inside the quiet window (local hour-of-day).
    pub fn is_quiet(&self, t: DateTime<Utc>) -> bool {
        let hour = t.with_timezone(&self.tz).hour();
        if self.start_hour > self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            hour >= self.start_hour && hour < self.end_hour
        }
    }

    /// Smallest instant `>= t` that lies on a `step_minutes` grid anchored at
    /// local midnight.
    pub fn round_up_to_boundary(&self, t: DateTime<Utc>, step_minutes: u32) -> DateTime<Utc> {
        if step_minutes == 0 {
            return t;
        }
        let local = t.with_timezone(&self.tz);
        let step = i64::from(step_minutes) * 60;
        let since_midnight = i64::from(local.num_seconds_from_midnight());
        // Leap-second representation pushes nanos past 1e9.
        let nanos = i64::from(local.nanosecond() % 1_000_000_000);
        let rem = since_midnight % step;
        if rem == 0 && nanos == 0 {
            return t;
        }
        t + Duration::seconds(step - rem) - Duration::nanoseconds(nanos)
    }

    /// Local `end_hour:00` on the same day when `t` is before the quiet start,
    /// otherwise on the following day.
    pub fn next_quiet_end(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let local = t.with_timezone(&self.tz);
        let mut date = local.date_naive();
        if local.hour() >= self.start_hour {
            date += Duration::days(1);
        }
        let naive = date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(self.end_hour));
        match self.tz.from_local_datetime(&naive).earliest() {
            Some(resolved) => resolved.with_timezone(&Utc),
            // DST gap swallowed the wall-clock hour; fall back to the UTC reading.
            None => Utc.from_utc_datetime(&naive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_rejects_out_of_range_hours() {
        assert!(QuietWindow::new(24, 7, Tz::UTC).is_err());
        assert!(QuietWindow::new(23, 30, Tz::UTC).is_err());
    }

    #[test]
    fn test_wraparound_window_membership() {
        for (start, end) in [(23, 7), (22, 6), (20, 1), (12, 11)] {
            let window = QuietWindow::new(start, end, Tz::UTC).unwrap();
            for hour in 0..24 {
                let expected = hour >= start || hour < end;
                assert_eq!(
                    window.is_quiet(at(hour, 30)),
                    expected,
                    "window {}..{} hour {}",
                    start,
                    end,
                    hour
                );
            }
        }
    }

    #[test]
    fn test_same_day_and_empty_windows() {
        let window = QuietWindow::new(1, 5, Tz::UTC).unwrap();
        assert!(window.is_quiet(at(1, 0)));
        assert!(window.is_quiet(at(4, 59)));
        assert!(!window.is_quiet(at(5, 0)));
        assert!(!window.is_quiet(at(0, 59)));

        let empty = QuietWindow::new(9, 9, Tz::UTC).unwrap();
        assert!((0..24).all(|h| !empty.is_quiet(at(h, 0))));
    }

    #[test]
    fn test_same_day_window_is_not_wrapped() {
        let window = QuietWindow::new(9, 17, Tz::UTC).unwrap();
        let quiet: Vec<u32> = (0..24).filter(|h| window.is_quiet(at(*h, 0))).collect();
        assert_eq!(quiet, (9..17).collect::<Vec<u32>>());
    }

    #[test]
    fn test_quiet_uses_local_hour() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let window = QuietWindow::new(23, 7, tz).unwrap();
        // 03:30 UTC in March (EDT, UTC-4) is 23:30 local.
        assert!(window.is_quiet(at(3, 30)));
        // 12:00 UTC is 08:00 local.
        assert!(!window.is_quiet(at(12, 0)));
    }

    #[test]
    fn test_round_up_to_hour() {
        let window = QuietWindow::new(23, 7, Tz::UTC).unwrap();
        assert_eq!(window.round_up_to_boundary(at(10, 0), 60), at(10, 0));
        assert_eq!(window.round_up_to_boundary(at(10, 1), 60), at(11, 0));
        assert_eq!(window.round_up_to_boundary(at(10, 59), 60), at(11, 0));
        let with_seconds = at(10, 0) + Duration::seconds(1);
        assert_eq!(window.round_up_to_boundary(with_seconds, 60), at(11, 0));
    }

    #[test]
    fn test_round_up_short_step() {
        let window = QuietWindow::new(23, 7, Tz::UTC).unwrap();
        assert_eq!(window.round_up_to_boundary(at(10, 7), 15), at(10, 15));
        assert_eq!(window.round_up_to_boundary(at(10, 45), 15), at(10, 45));
        assert_eq!(window.round_up_to_boundary(at(10, 7), 0), at(10, 7));
    }

    #[test]
    fn test_round_up_respects_half_hour_offset() {
        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        let window = QuietWindow::new(23, 7, tz).unwrap();
        // 10:10 UTC is 15:40 IST; next local whole hour is 16:00 IST = 10:30 UTC.
        assert_eq!(window.round_up_to_boundary(at(10, 10), 60), at(10, 30));
    }

    #[test]
    fn test_next_quiet_end() {
        let window = QuietWindow::new(23, 7, Tz::UTC).unwrap();
        // Before the quiet start: same calendar day.
        assert_eq!(window.next_quiet_end(at(3, 0)), at(7, 0));
        // At or after the quiet start: next day.
        let next_day = Utc.with_ymd_and_hms(2026, 3, 11, 7, 0, 0).unwrap();
        assert_eq!(window.next_quiet_end(at(23, 15)), next_day);
    }
}
