//! Per-session conversation state and its store.
//!
//! Each session is owned by exactly one turn at a time: the store hands out
//! an owned mutex guard per session id, so turns for the same session are
//! serialized in arrival order while different sessions proceed
//! independently. Idle sessions are evicted by a background task; a turn for
//! an evicted id just starts a new session.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::calendar::TimeSlot;
use crate::intent::ParsedIntent;

/// Negotiation stage of a session.
///
/// Ordered so that forward progress can be asserted: absent cancellation or
/// an explicit modify, the stage never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collecting,
    Offering,
    AwaitingConfirmation,
    Booked,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Booked | Stage::Cancelled)
    }
}

/// A constraint update that cannot be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintViolation {
    NonPositiveDuration,
    EmptyWindow,
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintViolation::NonPositiveDuration => {
                write!(f, "the duration must be a positive number of minutes")
            }
            ConstraintViolation::EmptyWindow => {
                write!(f, "the end of the time range must come after its start")
            }
        }
    }
}

/// Booking parameters accumulated across turns
#[derive(Debug, Clone, Default, Serialize)]
pub struct PendingRequest {
    pub title: Option<String>,
    pub participants: BTreeSet<String>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
}

impl PendingRequest {
    /// Fold one intent's fields in. Fields absent from the intent keep their
    /// previous values; participants accumulate as a union. Invalid values
    /// are rejected whole, leaving the request untouched.
    pub fn merge(&mut self, intent: &ParsedIntent) -> Result<(), ConstraintViolation> {
        if matches!(intent.duration_minutes, Some(m) if m <= 0) {
            return Err(ConstraintViolation::NonPositiveDuration);
        }

        let earliest = intent.earliest.or(self.earliest);
        let latest = intent.latest.or(self.latest);
        if let (Some(earliest), Some(latest)) = (earliest, latest)
            && latest <= earliest
        {
            return Err(ConstraintViolation::EmptyWindow);
        }

        if intent.title.is_some() {
            self.title = intent.title.clone();
        }
        self.participants.extend(intent.participants.iter().cloned());
        self.earliest = earliest;
        self.latest = latest;
        if intent.duration_minutes.is_some() {
            self.duration_minutes = intent.duration_minutes;
        }
        Ok(())
    }

    /// The search window, once both bounds are known
    pub fn window(&self) -> Option<TimeSlot> {
        match (self.earliest, self.latest) {
            (Some(start), Some(end)) if end > start => Some(TimeSlot { start, end }),
            _ => None,
        }
    }

    pub fn duration_or(&self, default: Duration) -> Duration {
        self.duration_minutes
            .map(Duration::minutes)
            .unwrap_or(default)
    }
}

/// One session's conversation state, mutated once per turn by the engine
#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub session_id: String,
    pub stage: Stage,
    pub pending: PendingRequest,
    pub offered_slots: Vec<TimeSlot>,
    /// Index into `offered_slots` once the user has picked one
    pub selected: Option<usize>,
    pub confirmed_slot: Option<TimeSlot>,
    pub booking_ref: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            stage: Stage::Collecting,
            pending: PendingRequest::default(),
            offered_slots: Vec::new(),
            selected: None,
            confirmed_slot: None,
            booking_ref: None,
            last_updated: now,
        }
    }
}

/// Keyed store of conversation state with single-writer-per-session access
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<ConversationState>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::minutes(30)),
        }
    }

    /// Acquire exclusive access to one session, creating it on first use.
    ///
    /// The returned guard serializes turns for this id; the store itself is
    /// never locked while a turn runs.
    pub async fn checkout(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> OwnedMutexGuard<ConversationState> {
        let cell = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %session_id, "Creating session");
                Arc::new(Mutex::new(ConversationState::new(session_id, now)))
            })
            .clone();

        cell.lock_owned().await
    }

    /// Clone of the current state, if the session exists
    pub async fn snapshot(&self, session_id: &str) -> Option<ConversationState> {
        let cell = self.sessions.get(session_id)?.clone();
        Some(cell.lock().await.clone())
    }

    /// Drop a session outright; returns whether it existed
    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove sessions idle past the TTL. Sessions with a turn in flight
    /// hold their lock and are skipped.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, cell| match cell.try_lock() {
            Ok(state) => now - state.last_updated < ttl,
            Err(_) => true,
        });
        before - self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentAction;
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 8, hour, 0, 0).unwrap()
    }

    #[test]
    fn merge_is_a_union_of_disjoint_updates() {
        let mut pending = PendingRequest::default();

        let first = ParsedIntent {
            action: IntentAction::ProvideConstraint,
            participants: ["John".to_string()].into(),
            duration_minutes: Some(60),
            ..Default::default()
        };
        let second = ParsedIntent {
            action: IntentAction::ProvideConstraint,
            title: Some("Haircut".to_string()),
            earliest: Some(t(6)),
            latest: Some(t(12)),
            ..Default::default()
        };

        pending.merge(&first).unwrap();
        pending.merge(&second).unwrap();

        assert_eq!(pending.title.as_deref(), Some("Haircut"));
        assert!(pending.participants.contains("John"));
        assert_eq!(pending.duration_minutes, Some(60));
        assert!(pending.window().is_some());
    }

    #[test]
    fn merge_is_idempotent() {
        let intent = ParsedIntent {
            action: IntentAction::ProvideConstraint,
            participants: ["John".to_string()].into(),
            earliest: Some(t(6)),
            latest: Some(t(12)),
            duration_minutes: Some(60),
            ..Default::default()
        };

        let mut once = PendingRequest::default();
        once.merge(&intent).unwrap();

        let mut twice = once.clone();
        twice.merge(&intent).unwrap();

        assert_eq!(format!("{:?}", once), format!("{:?}", twice));
        assert_eq!(twice.participants.len(), 1);
    }

    #[test]
    fn partial_update_keeps_earlier_fields() {
        let mut pending = PendingRequest::default();
        pending
            .merge(&ParsedIntent {
                title: Some("Haircut".to_string()),
                duration_minutes: Some(45),
                ..Default::default()
            })
            .unwrap();
        pending
            .merge(&ParsedIntent {
                earliest: Some(t(6)),
                latest: Some(t(12)),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(pending.title.as_deref(), Some("Haircut"));
        assert_eq!(pending.duration_minutes, Some(45));
    }

    #[test]
    fn invalid_updates_are_rejected_whole() {
        let mut pending = PendingRequest::default();

        let err = pending
            .merge(&ParsedIntent {
                title: Some("Haircut".to_string()),
                duration_minutes: Some(-30),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ConstraintViolation::NonPositiveDuration);
        assert!(pending.title.is_none());

        let err = pending
            .merge(&ParsedIntent {
                earliest: Some(t(12)),
                latest: Some(t(6)),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ConstraintViolation::EmptyWindow);
        assert!(pending.earliest.is_none());
    }

    #[test]
    fn inverted_window_across_turns_is_rejected() {
        let mut pending = PendingRequest::default();
        pending
            .merge(&ParsedIntent {
                earliest: Some(t(12)),
                ..Default::default()
            })
            .unwrap();

        let err = pending
            .merge(&ParsedIntent {
                latest: Some(t(6)),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ConstraintViolation::EmptyWindow);
    }

    #[tokio::test]
    async fn checkout_creates_lazily() {
        let store = SessionStore::new(std::time::Duration::from_secs(60));
        assert!(store.is_empty());

        let guard = store.checkout("s1", t(9)).await;
        assert_eq!(guard.stage, Stage::Collecting);
        drop(guard);

        assert_eq!(store.len(), 1);
        assert!(store.snapshot("s1").await.is_some());
        assert!(store.snapshot("missing").await.is_none());
    }

    #[tokio::test]
    async fn turns_for_one_session_are_serialized() {
        let store = Arc::new(SessionStore::new(std::time::Duration::from_secs(60)));

        let guard = store.checkout("s1", t(9)).await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut guard = store.checkout("s1", t(9)).await;
                guard.pending.title = Some("Second".to_string());
            })
        };

        // The spawned turn cannot proceed while the first holds the guard
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();

        let state = store.snapshot("s1").await.unwrap();
        assert_eq!(state.pending.title.as_deref(), Some("Second"));
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let store = SessionStore::new(std::time::Duration::from_secs(600));

        drop(store.checkout("stale", t(9)).await);
        let mut fresh = store.checkout("fresh", t(9)).await;
        fresh.last_updated = t(11);
        drop(fresh);

        let evicted = store.evict_idle(t(11));
        assert_eq!(evicted, 1);
        assert!(store.snapshot("stale").await.is_none());
        assert!(store.snapshot("fresh").await.is_some());

        // An evicted id simply starts over
        let guard = store.checkout("stale", t(11)).await;
        assert_eq!(guard.stage, Stage::Collecting);
    }

    #[tokio::test]
    async fn sessions_with_a_turn_in_flight_survive_eviction() {
        let store = SessionStore::new(std::time::Duration::from_secs(1));

        let guard = store.checkout("busy", t(9)).await;
        assert_eq!(store.evict_idle(t(12)), 0);
        drop(guard);
    }
}
