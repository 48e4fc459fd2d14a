//! Process-local calendar backend.
//!
//! Holds committed events behind one mutex so a commit's free-check and
//! insert are a single atomic step. Used for development and tests; the no
//! double-booking guarantee of the engine is exercised against this backend.

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{CalendarGateway, TimeSlot, merge_slots};
use crate::error::CalendarError;

#[derive(Debug, Clone)]
struct BookedEvent {
    id: String,
    slot: TimeSlot,
    #[allow(dead_code)]
    title: String,
}

/// In-memory calendar with atomic commit semantics
#[derive(Default)]
pub struct InMemoryCalendar {
    events: Mutex<Vec<BookedEvent>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalendarGateway for InMemoryCalendar {
    async fn query_busy(&self, window: TimeSlot) -> Result<Vec<TimeSlot>, CalendarError> {
        let events = self
            .events
            .lock()
            .map_err(|_| CalendarError::Unavailable {
                message: "calendar state poisoned".to_string(),
            })?;

        let busy = events
            .iter()
            .filter(|e| e.slot.overlaps(&window))
            .map(|e| e.slot)
            .collect();
        Ok(merge_slots(busy))
    }

    async fn commit(
        &self,
        slot: TimeSlot,
        title: &str,
        _participants: &[String],
    ) -> Result<String, CalendarError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| CalendarError::Unavailable {
                message: "calendar state poisoned".to_string(),
            })?;

        if events.iter().any(|e| e.slot.overlaps(&slot)) {
            return Err(CalendarError::Conflict);
        }

        let id = Uuid::new_v4().to_string();
        events.push(BookedEvent {
            id: id.clone(),
            slot,
            title: title.to_string(),
        });
        Ok(id)
    }

    async fn cancel(&self, booking_ref: &str) -> Result<(), CalendarError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| CalendarError::Unavailable {
                message: "calendar state poisoned".to_string(),
            })?;

        let before = events.len();
        events.retain(|e| e.id != booking_ref);
        if events.len() == before {
            return Err(CalendarError::NotFound {
                booking_ref: booking_ref.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use futures::future::join_all;
    use std::sync::Arc;

    fn slot(start_hour: u32, end_hour: u32) -> TimeSlot {
        TimeSlot {
            start: Utc.with_ymd_and_hms(2025, 7, 8, start_hour, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 7, 8, end_hour, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn commit_then_busy() {
        let calendar = InMemoryCalendar::new();
        calendar.commit(slot(13, 14), "Standup", &[]).await.unwrap();

        let busy = calendar.query_busy(slot(9, 18)).await.unwrap();
        assert_eq!(busy, vec![slot(13, 14)]);
    }

    #[tokio::test]
    async fn overlapping_commit_conflicts() {
        let calendar = InMemoryCalendar::new();
        calendar.commit(slot(13, 14), "Standup", &[]).await.unwrap();

        let err = calendar
            .commit(slot(13, 14), "Review", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CalendarError::Conflict));

        // Adjacent slot is still free
        calendar.commit(slot(14, 15), "Review", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_frees_the_slot() {
        let calendar = InMemoryCalendar::new();
        let booking_ref = calendar.commit(slot(13, 14), "Standup", &[]).await.unwrap();

        calendar.cancel(&booking_ref).await.unwrap();
        assert!(calendar.query_busy(slot(9, 18)).await.unwrap().is_empty());

        let err = calendar.cancel(&booking_ref).await.unwrap_err();
        assert!(matches!(err, CalendarError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_commits_have_one_winner() {
        let calendar = Arc::new(InMemoryCalendar::new());

        let attempts = (0..16).map(|i| {
            let calendar = calendar.clone();
            tokio::spawn(async move {
                calendar
                    .commit(slot(15, 16), &format!("Meeting {}", i), &[])
                    .await
            })
        });

        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(CalendarError::Conflict)))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 15);
    }
}
