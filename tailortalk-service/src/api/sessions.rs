//! Session API endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::error::ServiceResult;
use crate::session::ConversationState;

use super::AppState;

/// Current state of one session
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<ConversationState>> {
    let session = state.service.session(&id).await?;
    Ok(Json(session))
}

/// Drop a session; succeeds whether or not it existed
pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    state.service.end_session(&id);
    StatusCode::NO_CONTENT
}
