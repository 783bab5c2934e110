//! Anti-duplicate resolver: idempotent event materialization
//!
//! Every event the engine creates carries a marker line in its description.
//! Before creating, the resolver searches a window around the intended start
//! for that marker and reuses the event it finds, so a repeated or overlapping
//! tick never produces a second copy.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::SurfaceError;
use crate::fingerprint::Fingerprint;
use crate::surface::{CalendarSurface, EventDraft};

/// Line prefix the marker is written under.
pub const MARKER_TAG: &str = "escalation-marker: ";

fn format_start(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%MZ").to_string()
}

/// Marker of block `index` of the chain `fingerprint`.
pub fn block_marker(fingerprint: &Fingerprint, index: usize, start: DateTime<Utc>) -> String {
    format!("{}|B{}|{}", fingerprint, index, format_start(start))
}

/// Marker of the chain's terminal event.
pub fn final_marker(fingerprint: &Fingerprint, deadline: DateTime<Utc>) -> String {
    format!("{}|FINAL|{}", fingerprint, format_start(deadline))
}

/// Result of [`DuplicateResolver::ensure_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredEvent {
    pub id: String,
    /// `false` when an existing event with the marker was reused.
    pub created: bool,
}

/// Finds or creates marker-tagged events.
#[derive(Clone)]
pub struct DuplicateResolver {
    calendar: Arc<dyn CalendarSurface>,
    slack: Duration,
}

impl DuplicateResolver {
    pub fn new(calendar: Arc<dyn CalendarSurface>, slack_minutes: u32) -> Self {
        Self {
            calendar,
            slack: Duration::minutes(i64::from(slack_minutes)),
        }
    }

    /// Return the event carrying `marker`, creating it from `draft` if absent.
    /// Reminders are (re)applied either way, so a create that succeeded on an
    /// earlier attempt but lost its reminders is repaired here.
    pub async fn ensure_event(
        &self,
        draft: EventDraft,
        marker: &str,
        lead_minutes: &[u32],
    ) -> Result<EnsuredEvent, SurfaceError> {
        let existing = self
            .calendar
            .find_event_by_marker(draft.start - self.slack, draft.start + self.slack, marker)
            .await?;

        let ensured = match existing {
            Some(event) => {
                debug!(marker, event_id = %event.id, "Marker already materialized, reusing event");
                EnsuredEvent {
                    id: event.id,
                    created: false,
                }
            }
            None => {
                let tagged = EventDraft {
                    description: format!("{}\n\n{}{}", draft.description, MARKER_TAG, marker),
                    ..draft
                };
                let id = self.calendar.create_event(&tagged).await?;
                info!(marker, event_id = %id, start = %tagged.start, "Created event");
                EnsuredEvent { id, created: true }
            }
        };

        self.calendar.set_reminders(&ensured.id, lead_minutes).await?;
        Ok(ensured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::InMemoryCalendar;
    use chrono::TimeZone;

    fn draft(start: DateTime<Utc>) -> EventDraft {
        EventDraft {
            title: "[reminder] code (1/3)".into(),
            start,
            end: start + Duration::minutes(5),
            description: "Delete this event to stop reminders.".into(),
        }
    }

    #[test]
    fn test_marker_format() {
        let fp = Fingerprint::from_raw("LIVE-202601011000-0011aabb");
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap();
        assert_eq!(
            block_marker(&fp, 2, start),
            "LIVE-202601011000-0011aabb|B2|2026-01-01T15:00Z"
        );
        assert_eq!(
            final_marker(&fp, start),
            "LIVE-202601011000-0011aabb|FINAL|2026-01-01T15:00Z"
        );
    }

    #[tokio::test]
    async fn test_ensure_event_is_idempotent() {
        let cal = Arc::new(InMemoryCalendar::new());
        let resolver = DuplicateResolver::new(cal.clone(), 60);
        let fp = Fingerprint::from_raw("LIVE-1-ab");
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap();
        let marker = block_marker(&fp, 0, start);

        let first = resolver.ensure_event(draft(start), &marker, &[60, 0]).await.unwrap();
        let second = resolver.ensure_event(draft(start), &marker, &[60, 0]).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(cal.len(), 1);

        let event = cal.get(&first.id).unwrap();
        assert!(event.description.ends_with(&format!("{}{}", MARKER_TAG, marker)));
        assert_eq!(event.reminders, vec![60, 0]);
    }

    #[tokio::test]
    async fn test_distinct_markers_create_distinct_events() {
        let cal = Arc::new(InMemoryCalendar::new());
        let resolver = DuplicateResolver::new(cal.clone(), 60);
        let fp = Fingerprint::from_raw("LIVE-1-ab");
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap();

        let a = resolver
            .ensure_event(draft(start), &block_marker(&fp, 0, start), &[0])
            .await
            .unwrap();
        let b = resolver
            .ensure_event(draft(start), &block_marker(&fp, 1, start), &[0])
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(cal.len(), 2);
    }
}
