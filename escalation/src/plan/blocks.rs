//! Block Packer: collapse consecutive signals into one event-with-reminders

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A group of signals materialized as one external event.
///
/// `start` is the latest signal of the group; `lead_minutes[i]` is how many
/// minutes before `start` signal `i` fires. Lead times are non-increasing and
/// always end in 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub start: DateTime<Utc>,
    pub lead_minutes: Vec<u32>,
}

impl Block {
    /// The signals this block fires, in chronological order.
    pub fn signals(&self) -> Vec<DateTime<Utc>> {
        self.lead_minutes
            .iter()
            .map(|lead| self.start - Duration::minutes(i64::from(*lead)))
            .collect()
    }

    /// Earliest instant this block's event will ring.
    pub fn first_signal(&self) -> DateTime<Utc> {
        let lead = self.lead_minutes.first().copied().unwrap_or(0);
        self.start - Duration::minutes(i64::from(lead))
    }

    pub fn len(&self) -> usize {
        self.lead_minutes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lead_minutes.is_empty()
    }
}

/// Partition `signals` into order-preserving blocks of at most
/// `max_signals_per_block` entries (a capacity of 0 is treated as 1).
pub fn pack_blocks(signals: &[DateTime<Utc>], max_signals_per_block: usize) -> Vec<Block> {
    signals
        .chunks(max_signals_per_block.max(1))
        .filter_map(|chunk| {
            let start = *chunk.last()?;
            let lead_minutes = chunk
                .iter()
                .map(|signal| {
                    let secs = (start - *signal).num_seconds().max(0);
                    u32::try_from((secs + 30) / 60).unwrap_or(u32::MAX)
                })
                .collect();
            Some(Block {
                start,
                lead_minutes,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly(count: usize) -> Vec<DateTime<Utc>> {
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
        (0..count)
            .map(|i| base + Duration::hours(i as i64))
            .collect()
    }

    #[test]
    fn test_pack_sizes() {
        let sizes: Vec<usize> = pack_blocks(&hourly(13), 5).iter().map(Block::len).collect();
        assert_eq!(sizes, vec![5, 5, 3]);
        let sizes: Vec<usize> = pack_blocks(&hourly(10), 5).iter().map(Block::len).collect();
        assert_eq!(sizes, vec![5, 5]);
    }

    #[test]
    fn test_block_start_is_last_signal() {
        let signals = hourly(7);
        let blocks = pack_blocks(&signals, 5);
        assert_eq!(blocks[0].start, signals[4]);
        assert_eq!(blocks[0].lead_minutes, vec![240, 180, 120, 60, 0]);
        assert_eq!(blocks[0].first_signal(), signals[0]);
        assert_eq!(blocks[1].start, signals[6]);
        assert_eq!(blocks[1].lead_minutes, vec![60, 0]);
    }

    #[test]
    fn test_irregular_gaps_round_to_minutes() {
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
        let signals = vec![
            base,
            base + Duration::hours(1),
            base + Duration::hours(1) + Duration::minutes(45),
        ];
        let blocks = pack_blocks(&signals, 5);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lead_minutes, vec![105, 45, 0]);
    }

    #[test]
    fn test_empty_and_zero_capacity() {
        assert!(pack_blocks(&[], 5).is_empty());
        let blocks = pack_blocks(&hourly(3), 0);
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.lead_minutes == vec![0]));
    }

    #[test]
    fn test_block_serde_shape() {
        let block = pack_blocks(&hourly(2), 5).remove(0);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["lead_minutes"], serde_json::json!([60, 0]));
        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }
}
