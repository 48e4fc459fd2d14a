//! Direct calendar endpoints.
//!
//! Bypass the dialogue for callers that already know what they want:
//! a raw availability check and a raw event creation against the same
//! gateway the engine uses. A lost booking race surfaces as HTTP 409.

use axum::{
    Json,
    extract::State,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::calendar::TimeSlot;
use crate::error::{ServiceError, ServiceResult};

use super::AppState;

#[derive(Deserialize)]
pub struct CheckAvailabilityRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct CheckAvailabilityResponse {
    pub busy: Vec<TimeSlot>,
}

/// Busy intervals within a window
pub async fn check_availability_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckAvailabilityRequest>,
) -> ServiceResult<Json<CheckAvailabilityResponse>> {
    let window = TimeSlot::try_new(request.start, request.end)?;
    let busy = state.service.gateway.query_busy(window).await?;
    Ok(Json(CheckAvailabilityResponse { busy }))
}

#[derive(Deserialize)]
pub struct CreateEventRequest {
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<String>,
}

#[derive(Serialize)]
pub struct CreateEventResponse {
    pub booking_ref: String,
}

/// Create an event directly; 409 when the slot is already taken
pub async fn create_event_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateEventRequest>,
) -> ServiceResult<Json<CreateEventResponse>> {
    if request.summary.trim().is_empty() {
        return Err(ServiceError::InvalidRequest {
            message: "summary must not be empty".to_string(),
        });
    }

    let slot = TimeSlot::try_new(request.start, request.end)?;
    let booking_ref = state
        .service
        .gateway
        .commit(slot, &request.summary, &request.participants)
        .await?;
    Ok(Json(CreateEventResponse { booking_ref }))
}
