//! The dialogue state machine.
//!
//! One turn is a pure function of (current state, intent) producing the next
//! state and a user-facing response. The calendar commit is the only
//! external side effect; its outcome is folded into the next state in a
//! single step, so a failed turn never leaves a half-updated session. On
//! `Unavailable` the state is returned unchanged and the user may simply
//! retry the same turn.

use std::sync::Arc;

use chrono::{Duration, NaiveTime};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};

use crate::calendar::{CalendarGateway, TimeSlot};
use crate::config::SchedulingConfig;
use crate::error::{CalendarError, ServiceResult};
use crate::intent::{IntentAction, ParsedIntent};
use crate::session::{ConversationState, Stage};
use crate::slots::{SlotQuery, find_slots};

/// The user-visible outcome of one turn
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub text: String,
    pub offered_slots: Vec<TimeSlot>,
    pub stage: Stage,
}

/// Scheduling policy resolved from configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub timezone: Tz,
    pub workday: (NaiveTime, NaiveTime),
    pub max_offers: usize,
    pub default_duration: Duration,
    pub default_title: String,
}

impl EngineSettings {
    pub fn from_config(config: &SchedulingConfig) -> ServiceResult<Self> {
        Ok(Self {
            timezone: config.timezone()?,
            workday: config.working_hours()?,
            max_offers: config.max_offers,
            default_duration: Duration::minutes(i64::from(config.default_duration_minutes)),
            default_title: "Appointment".to_string(),
        })
    }
}

pub struct DialogueEngine {
    settings: EngineSettings,
    gateway: Arc<dyn CalendarGateway>,
}

impl DialogueEngine {
    pub fn new(settings: EngineSettings, gateway: Arc<dyn CalendarGateway>) -> Self {
        Self { settings, gateway }
    }

    /// Run one conversation turn.
    ///
    /// Never fails: every error condition folds into a conversational
    /// response, with the state either fully advanced or untouched.
    pub async fn handle_turn(
        &self,
        state: &ConversationState,
        intent: &ParsedIntent,
    ) -> (ConversationState, AgentResponse) {
        let mut next = state.clone();

        let text = match (state.stage, intent.action) {
            (Stage::Booked, IntentAction::Cancel) => {
                return self.cancel_booking(state).await;
            }
            (stage, _) if stage.is_terminal() => replies::finished(stage),

            (_, IntentAction::Cancel) => {
                next.pending = Default::default();
                next.offered_slots.clear();
                next.selected = None;
                next.stage = Stage::Cancelled;
                info!(session_id = %state.session_id, "Session cancelled");
                replies::cancelled()
            }
            (_, IntentAction::Unrecognized) => replies::clarification(state.stage),

            (
                Stage::Collecting | Stage::Offering,
                IntentAction::RequestBooking | IntentAction::ProvideConstraint,
            ) => match next.pending.merge(intent) {
                Err(violation) => {
                    next = state.clone();
                    replies::correction(violation)
                }
                Ok(()) => match next.pending.window() {
                    None => replies::missing_window(),
                    Some(window) => match self.refresh_offers(&mut next, window).await {
                        Err(e) => {
                            warn!(session_id = %state.session_id, error = %e, "Availability query failed");
                            next = state.clone();
                            replies::transient_failure()
                        }
                        Ok(true) => replies::offers(&next.offered_slots, self.settings.timezone),
                        Ok(false) => replies::no_slots_in_window(),
                    },
                },
            },

            (Stage::Offering, IntentAction::SelectSlot) => match intent.selected_index {
                Some(i) if (1..=state.offered_slots.len()).contains(&i) => {
                    next.selected = Some(i - 1);
                    next.stage = Stage::AwaitingConfirmation;
                    replies::confirm_prompt(
                        &state.offered_slots[i - 1],
                        self.title(&next),
                        self.settings.timezone,
                    )
                }
                _ => replies::out_of_range(state.offered_slots.len()),
            },

            (Stage::AwaitingConfirmation, IntentAction::Confirm) => {
                return self.commit_selected(state).await;
            }

            (Stage::AwaitingConfirmation, IntentAction::Modify) => {
                next.offered_slots.clear();
                next.selected = None;
                next.stage = Stage::Collecting;
                replies::modify_prompt()
            }

            _ => replies::clarification(state.stage),
        };

        let response = AgentResponse {
            text,
            offered_slots: next.offered_slots.clone(),
            stage: next.stage,
        };
        (next, response)
    }

    /// Recompute the offer set from fresh availability. Returns whether any
    /// slots were found; on `false` the session falls back to COLLECTING.
    async fn refresh_offers(
        &self,
        next: &mut ConversationState,
        window: TimeSlot,
    ) -> Result<bool, CalendarError> {
        let busy = self.gateway.query_busy(window).await?;
        let slots = find_slots(
            &busy,
            &SlotQuery {
                earliest: window.start,
                latest: window.end,
                duration: next.pending.duration_or(self.settings.default_duration),
                timezone: self.settings.timezone,
                workday: self.settings.workday,
                max_offers: self.settings.max_offers,
            },
        );

        if slots.is_empty() {
            next.offered_slots.clear();
            next.selected = None;
            next.stage = Stage::Collecting;
            Ok(false)
        } else {
            next.offered_slots = slots;
            next.selected = None;
            next.stage = Stage::Offering;
            Ok(true)
        }
    }

    /// CONFIRM in AWAITING_CONFIRMATION: attempt the calendar commit
    async fn commit_selected(
        &self,
        state: &ConversationState,
    ) -> (ConversationState, AgentResponse) {
        let Some(slot) = state.selected.and_then(|i| state.offered_slots.get(i).copied()) else {
            // No recorded selection; re-prompt rather than guess
            return self.unchanged(state, replies::clarification(state.stage));
        };

        let title = self.title(state);
        let participants: Vec<String> = state.pending.participants.iter().cloned().collect();

        match self.gateway.commit(slot, &title, &participants).await {
            Ok(booking_ref) => {
                let mut next = state.clone();
                next.stage = Stage::Booked;
                next.confirmed_slot = Some(slot);
                next.booking_ref = Some(booking_ref.clone());
                next.offered_slots.clear();
                next.selected = None;
                info!(
                    session_id = %state.session_id,
                    booking_ref = %booking_ref,
                    "Booking committed"
                );
                let text = replies::booked(&slot, &title, self.settings.timezone);
                let response = AgentResponse {
                    text,
                    offered_slots: Vec::new(),
                    stage: Stage::Booked,
                };
                (next, response)
            }
            Err(CalendarError::Conflict) => {
                // The chosen slot was raced away; the whole offer set is
                // stale. Re-derive offers instead of retrying the same slot.
                info!(session_id = %state.session_id, "Commit lost the race, re-offering");
                let mut next = state.clone();
                let window = match next.pending.window() {
                    Some(window) => window,
                    None => {
                        return self.unchanged(state, replies::transient_failure());
                    }
                };
                match self.refresh_offers(&mut next, window).await {
                    Ok(true) => {
                        let text =
                            replies::conflict_reoffer(&next.offered_slots, self.settings.timezone);
                        let response = AgentResponse {
                            text,
                            offered_slots: next.offered_slots.clone(),
                            stage: next.stage,
                        };
                        (next, response)
                    }
                    Ok(false) => {
                        let response = AgentResponse {
                            text: replies::conflict_exhausted(),
                            offered_slots: Vec::new(),
                            stage: next.stage,
                        };
                        (next, response)
                    }
                    Err(e) => {
                        warn!(session_id = %state.session_id, error = %e, "Re-offer after conflict failed");
                        self.unchanged(state, replies::transient_failure())
                    }
                }
            }
            Err(e) => {
                warn!(session_id = %state.session_id, error = %e, "Commit failed");
                self.unchanged(state, replies::transient_failure())
            }
        }
    }

    /// CANCEL in BOOKED: delete the committed event as well
    async fn cancel_booking(&self, state: &ConversationState) -> (ConversationState, AgentResponse) {
        let Some(booking_ref) = state.booking_ref.clone() else {
            return self.unchanged(state, replies::finished(state.stage));
        };

        match self.gateway.cancel(&booking_ref).await {
            // NotFound means the event is already gone; either way the
            // booking no longer exists.
            Ok(()) | Err(CalendarError::NotFound { .. }) => {
                let mut next = state.clone();
                next.stage = Stage::Cancelled;
                next.confirmed_slot = None;
                next.booking_ref = None;
                next.pending = Default::default();
                info!(session_id = %state.session_id, booking_ref = %booking_ref, "Booking cancelled");
                let response = AgentResponse {
                    text: replies::booking_cancelled(),
                    offered_slots: Vec::new(),
                    stage: Stage::Cancelled,
                };
                (next, response)
            }
            Err(e) => {
                warn!(session_id = %state.session_id, error = %e, "Cancel failed");
                self.unchanged(state, replies::transient_failure())
            }
        }
    }

    fn unchanged(
        &self,
        state: &ConversationState,
        text: String,
    ) -> (ConversationState, AgentResponse) {
        let response = AgentResponse {
            text,
            offered_slots: state.offered_slots.clone(),
            stage: state.stage,
        };
        (state.clone(), response)
    }

    fn title(&self, state: &ConversationState) -> String {
        state
            .pending
            .title
            .clone()
            .unwrap_or_else(|| self.settings.default_title.clone())
    }
}

/// User-facing reply text
pub(crate) mod replies {
    use chrono_tz::Tz;

    use crate::calendar::TimeSlot;
    use crate::session::{ConstraintViolation, Stage};

    pub fn format_slot(slot: &TimeSlot, tz: Tz) -> String {
        format!(
            "{} to {}",
            slot.start.with_timezone(&tz).format("%a %b %-d, %H:%M"),
            slot.end.with_timezone(&tz).format("%H:%M"),
        )
    }

    fn numbered(slots: &[TimeSlot], tz: Tz) -> String {
        slots
            .iter()
            .enumerate()
            .map(|(i, slot)| format!("{}. {}", i + 1, format_slot(slot, tz)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn missing_window() -> String {
        "When would you like the appointment? Please give me a date or time range.".to_string()
    }

    pub fn offers(slots: &[TimeSlot], tz: Tz) -> String {
        format!(
            "Here is what I found:\n{}\nReply with a number to pick one.",
            numbered(slots, tz)
        )
    }

    pub fn no_slots_in_window() -> String {
        "I couldn't find a free slot in that range. Could you try a different time or a shorter duration?".to_string()
    }

    pub fn out_of_range(count: usize) -> String {
        format!(
            "That isn't one of the options. Please pick a number between 1 and {}.",
            count
        )
    }

    pub fn confirm_prompt(slot: &TimeSlot, title: String, tz: Tz) -> String {
        format!(
            "You picked {} for \"{}\". Shall I book it?",
            format_slot(slot, tz),
            title
        )
    }

    pub fn booked(slot: &TimeSlot, title: &str, tz: Tz) -> String {
        format!(
            "Done! \"{}\" is booked for {}.",
            title,
            format_slot(slot, tz)
        )
    }

    pub fn conflict_reoffer(slots: &[TimeSlot], tz: Tz) -> String {
        format!(
            "Sorry, that slot was just taken. Here are the closest alternatives:\n{}\nReply with a number to pick one.",
            numbered(slots, tz)
        )
    }

    pub fn conflict_exhausted() -> String {
        "Sorry, that slot was just taken and nothing else is free in that range. Could you suggest another time?".to_string()
    }

    pub fn modify_prompt() -> String {
        "Sure, what would you like to change?".to_string()
    }

    pub fn cancelled() -> String {
        "Okay, I've cancelled this request. Let me know if you'd like to start over.".to_string()
    }

    pub fn booking_cancelled() -> String {
        "Your booking has been cancelled.".to_string()
    }

    pub fn transient_failure() -> String {
        "I'm having trouble reaching the calendar right now. Please try again in a moment."
            .to_string()
    }

    pub fn finished(stage: Stage) -> String {
        match stage {
            Stage::Booked => {
                "This appointment is already booked. Start a new conversation to book another."
                    .to_string()
            }
            _ => "This conversation has ended. Start a new one to book an appointment.".to_string(),
        }
    }

    pub fn correction(violation: ConstraintViolation) -> String {
        format!("I can't use that: {}. Could you rephrase?", violation)
    }

    pub fn clarification(stage: Stage) -> String {
        match stage {
            Stage::Collecting => {
                "I can help you book an appointment. When would you like it?".to_string()
            }
            Stage::Offering => {
                "Please pick one of the offered slots by number, or give me a different time range."
                    .to_string()
            }
            Stage::AwaitingConfirmation => {
                "Should I book the selected slot? Say yes to confirm, or tell me what to change."
                    .to_string()
            }
            stage => finished(stage),
        }
    }
}
