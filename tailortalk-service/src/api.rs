//! HTTP API for the TailorTalk service.
//!
//! Endpoints for:
//! - Health monitoring
//! - The conversational turn entry point
//! - Session inspection and teardown
//! - Direct calendar operations (availability check, event creation)

use axum::{
    Json, Router,
    extract::State,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::calendar::TimeSlot;
use crate::error::{ServiceError, ServiceResult};
use crate::service::TailorTalkService;
use crate::session::Stage;

pub mod events;
pub mod sessions;

use events::{check_availability_handler, create_event_handler};
use sessions::{delete_session_handler, get_session_handler};

/// Application state
pub struct AppState {
    pub service: Arc<TailorTalkService>,
    pub start_time: Instant,
}

/// Build the API router
pub fn router(service: Arc<TailorTalkService>) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/chat", post(chat_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .route("/sessions/{id}", delete(delete_session_handler))
        .route("/check-availability", post(check_availability_handler))
        .route("/create-event", post(create_event_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    active_sessions: usize,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions: state.service.session_count(),
    })
}

/// One conversational turn
#[derive(Deserialize)]
pub struct ChatRequest {
    /// Omitted on the first turn; the response carries the assigned id
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub text: String,
    pub offered_slots: Vec<TimeSlot>,
    pub stage: Stage,
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ServiceResult<Json<ChatResponse>> {
    if request.message.trim().is_empty() {
        return Err(ServiceError::InvalidRequest {
            message: "message must not be empty".to_string(),
        });
    }

    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let response = state
        .service
        .process_turn(&session_id, &request.message)
        .await;

    Ok(Json(ChatResponse {
        session_id,
        text: response.text,
        offered_slots: response.offered_slots,
        stage: response.stage,
    }))
}
