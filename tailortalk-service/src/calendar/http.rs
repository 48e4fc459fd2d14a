//! HTTP calendar backend.
//!
//! Speaks a small REST protocol against an external calendar service:
//! free/busy lookup, event creation, and event deletion. The backend is the
//! authority on conflicts; an HTTP 409 from the create endpoint surfaces as
//! `CalendarError::Conflict`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{CalendarGateway, TimeSlot, merge_slots};
use crate::config::CalendarConfig;
use crate::error::{CalendarError, ServiceError, ServiceResult};

/// Calendar API client
pub struct HttpCalendarGateway {
    client: Client,
    config: CalendarConfig,
}

impl HttpCalendarGateway {
    pub fn new(config: CalendarConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Internal {
                message: format!("Failed to build calendar HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    fn unavailable(message: impl Into<String>) -> CalendarError {
        CalendarError::Unavailable {
            message: message.into(),
        }
    }
}

#[async_trait]
impl CalendarGateway for HttpCalendarGateway {
    async fn query_busy(&self, window: TimeSlot) -> Result<Vec<TimeSlot>, CalendarError> {
        let url = format!("{}/freebusy", self.config.base_url);

        let request = FreeBusyRequest {
            calendar_id: self.config.calendar_id.clone(),
            time_min: window.start,
            time_max: window.end,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::unavailable(format!("freebusy request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(format!(
                "freebusy returned status {}",
                response.status()
            )));
        }

        let body: FreeBusyResponse = response
            .json()
            .await
            .map_err(|e| Self::unavailable(format!("invalid freebusy response: {}", e)))?;

        Ok(merge_slots(body.busy))
    }

    async fn commit(
        &self,
        slot: TimeSlot,
        title: &str,
        participants: &[String],
    ) -> Result<String, CalendarError> {
        let url = format!("{}/events", self.config.base_url);

        let request = CreateEventRequest {
            calendar_id: self.config.calendar_id.clone(),
            summary: title.to_string(),
            start: slot.start,
            end: slot.end,
            attendees: participants.to_vec(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::unavailable(format!("create event request failed: {}", e)))?;

        match response.status() {
            StatusCode::CONFLICT => Err(CalendarError::Conflict),
            status if status.is_success() => {
                let body: CreateEventResponse = response
                    .json()
                    .await
                    .map_err(|e| Self::unavailable(format!("invalid event response: {}", e)))?;
                Ok(body.id)
            }
            status => Err(Self::unavailable(format!(
                "create event returned status {}",
                status
            ))),
        }
    }

    async fn cancel(&self, booking_ref: &str) -> Result<(), CalendarError> {
        let url = format!(
            "{}/events/{}?calendar_id={}",
            self.config.base_url, booking_ref, self.config.calendar_id
        );

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable(format!("delete event request failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CalendarError::NotFound {
                booking_ref: booking_ref.to_string(),
            }),
            status if status.is_success() => Ok(()),
            status => Err(Self::unavailable(format!(
                "delete event returned status {}",
                status
            ))),
        }
    }
}

// Wire types for the calendar REST protocol

#[derive(Debug, Serialize)]
struct FreeBusyRequest {
    calendar_id: String,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    busy: Vec<TimeSlot>,
}

#[derive(Debug, Serialize)]
struct CreateEventRequest {
    calendar_id: String,
    summary: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attendees: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreateEventResponse {
    id: String,
}
