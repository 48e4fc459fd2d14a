//! Calendar types and the gateway contract.
//!
//! The calendar is externally owned: other clients may book the same
//! resource at any time, so `commit` can always fail with `Conflict` even
//! for a slot this service offered moments earlier.

mod http;
mod memory;

pub use http::HttpCalendarGateway;
pub use memory::InMemoryCalendar;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

/// A contiguous, timezone-aware time interval with `end > start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    /// Build a slot, rejecting empty or inverted intervals
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CalendarError> {
        if end <= start {
            return Err(CalendarError::InvalidSlot {
                message: format!("end ({}) must be after start ({})", end, start),
            });
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Coalesce intervals into an ordered, non-overlapping set
pub fn merge_slots(mut slots: Vec<TimeSlot>) -> Vec<TimeSlot> {
    slots.sort_by_key(|s| s.start);

    let mut merged: Vec<TimeSlot> = Vec::with_capacity(slots.len());
    for slot in slots {
        match merged.last_mut() {
            Some(last) if slot.start <= last.end => {
                last.end = last.end.max(slot.end);
            }
            _ => merged.push(slot),
        }
    }
    merged
}

/// Read/write contract against the backing calendar
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    /// Busy intervals overlapping `window`, merged and in chronological order
    async fn query_busy(&self, window: TimeSlot) -> Result<Vec<TimeSlot>, CalendarError>;

    /// Atomically create an event for `slot`.
    ///
    /// Fails with `Conflict` when the slot is no longer free and
    /// `Unavailable` for transport or backend failures.
    async fn commit(
        &self,
        slot: TimeSlot,
        title: &str,
        participants: &[String],
    ) -> Result<String, CalendarError>;

    /// Delete a previously committed event
    async fn cancel(&self, booking_ref: &str) -> Result<(), CalendarError>;
}
