use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("{0}")]
    Calendar(#[from] CalendarError),

    #[error("{0}")]
    Extractor(#[from] ExtractorError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Calendar gateway errors
///
/// `Conflict` means the slot was raced away by a concurrent booking; the
/// engine recovers by re-offering. `Unavailable` is a transport or backend
/// failure and leaves session state untouched so the turn can be retried.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Slot is no longer free")]
    Conflict,

    #[error("Calendar backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Booking not found: {booking_ref}")]
    NotFound { booking_ref: String },

    #[error("Invalid slot: {message}")]
    InvalidSlot { message: String },
}

/// Intent extractor errors
///
/// Unparseable model output is not an error (it maps to
/// `IntentAction::Unrecognized`); these cover the transport boundary only.
#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("Connection failed to extractor at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Extraction failed (status {status}): {message}")]
    Generation { status: u16, message: String },
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Calendar(CalendarError::Conflict) => StatusCode::CONFLICT,
            ServiceError::Calendar(CalendarError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::Calendar(CalendarError::InvalidSlot { .. }) => StatusCode::BAD_REQUEST,
            ServiceError::Calendar(CalendarError::Unavailable { .. })
            | ServiceError::Extractor(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::SessionNotFound { .. } => "session_not_found",
            ServiceError::Calendar(CalendarError::Conflict) => "slot_conflict",
            ServiceError::Calendar(CalendarError::Unavailable { .. }) => "calendar_unavailable",
            ServiceError::Calendar(CalendarError::NotFound { .. }) => "booking_not_found",
            ServiceError::Calendar(CalendarError::InvalidSlot { .. }) => "invalid_slot",
            ServiceError::Extractor(ExtractorError::Connection { .. }) => "extractor_connection",
            ServiceError::Extractor(ExtractorError::Generation { .. }) => "extractor_generation",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
