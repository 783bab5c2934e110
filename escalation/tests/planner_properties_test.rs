//! Planning invariants checked over a sweep of windows and quiet policies.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use escalation::{pack_blocks, EscalationConfig, QuietWindow, SignalPlanner};

fn planner(start: u32, end: u32, tz: Tz) -> SignalPlanner {
    SignalPlanner::new(QuietWindow::new(start, end, tz).unwrap(), 1)
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 28, 0, 0, 0).unwrap()
}

/// Arrival times at 37-minute strides across three days (crosses the
/// Europe/Berlin DST change) and deadlines 1-30 hours later.
fn windows() -> impl Iterator<Item = (DateTime<Utc>, DateTime<Utc>)> {
    (0..120).flat_map(|i| {
        let start = base() + Duration::minutes(37 * i);
        [1, 2, 5, 13, 23, 30]
            .into_iter()
            .map(move |h| (start, start + Duration::hours(h) + Duration::minutes(i % 7)))
    })
}

#[test]
fn test_signals_are_sorted_unique_and_never_quiet() {
    for tz in [Tz::UTC, Tz::Europe__Berlin, Tz::Asia__Kolkata] {
        let p = planner(23, 7, tz);
        for (start, deadline) in windows() {
            let signals = p.plan(start, deadline);
            assert!(
                signals.windows(2).all(|w| w[0] < w[1]),
                "unsorted signals for {} → {} in {}",
                start,
                deadline,
                tz
            );
            for s in &signals {
                assert!(!p.policy().is_quiet(*s), "quiet signal {} in {}", s, tz);
                assert!(*s >= start, "signal {} before window start {}", s, start);
                assert!(*s <= deadline - Duration::hours(1), "signal {} too late", s);
                assert_eq!(s.second(), 0);
            }
        }
    }
}

#[test]
fn test_last_signal_is_final_hour_when_not_quiet() {
    let p = planner(23, 7, Tz::UTC);
    for (start, deadline) in windows() {
        let end_signal = deadline - Duration::hours(1);
        if end_signal < start || p.policy().is_quiet(end_signal) {
            continue;
        }
        let signals = p.plan(start, deadline);
        assert_eq!(
            signals.last().copied(),
            Some(end_signal),
            "final hour missing for {} → {}",
            start,
            deadline
        );
    }
}

#[test]
fn test_blocks_partition_signals() {
    let p = planner(22, 8, Tz::Europe__Berlin);
    for max in [1, 2, 5, 7] {
        for (start, deadline) in windows() {
            let signals = p.plan(start, deadline);
            let blocks = pack_blocks(&signals, max);

            let rebuilt: Vec<_> = blocks.iter().flat_map(|b| b.signals()).collect();
            assert_eq!(rebuilt, signals);

            for block in &blocks {
                assert!(!block.is_empty() && block.len() <= max);
                assert_eq!(block.lead_minutes.last(), Some(&0));
                assert!(block.lead_minutes.windows(2).all(|w| w[0] >= w[1]));
            }
            assert!(blocks.windows(2).all(|w| w[0].start < w[1].start));
        }
    }
}

#[test]
fn test_overnight_scenario_default_policy() {
    let config = EscalationConfig::default();
    let p = config.planner().unwrap();
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
    let deadline = start + Duration::hours(23);

    let signals = p.plan(start, deadline);
    let hours: Vec<u32> = signals.iter().map(|s| s.hour()).collect();
    assert_eq!(hours, vec![11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 7, 8]);

    let blocks = pack_blocks(&signals, config.max_signals_per_block);
    let sizes: Vec<usize> = blocks.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![5, 5, 4]);
}

#[test]
fn test_overnight_scenario_quiet_until_eight() {
    let p = planner(23, 8, Tz::UTC);
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
    let signals = p.plan(start, start + Duration::hours(23));
    assert_eq!(signals.len(), 13);

    let blocks = pack_blocks(&signals, 5);
    let sizes: Vec<usize> = blocks.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![5, 5, 3]);
    assert_eq!(blocks[0].lead_minutes, vec![240, 180, 120, 60, 0]);
    // 21:00, 22:00 and the 08:00 final hour.
    assert_eq!(blocks[2].lead_minutes, vec![660, 600, 0]);
}
