//! Service coordinator.
//!
//! Wires the session store, the intent extractor, and the dialogue engine
//! together. `process_turn` is the single entry point the presentation
//! layer consumes: it serializes turns per session, runs extraction and one
//! engine transition, and persists the next state only when the turn
//! succeeded as a whole.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::calendar::CalendarGateway;
use crate::config::AppConfig;
use crate::engine::{AgentResponse, DialogueEngine, EngineSettings, replies};
use crate::error::{ServiceError, ServiceResult};
use crate::intent::{ExtractionContext, IntentExtractor};
use crate::session::{ConversationState, SessionStore};

pub struct TailorTalkService {
    engine: DialogueEngine,
    store: SessionStore,
    extractor: Arc<dyn IntentExtractor>,
    pub gateway: Arc<dyn CalendarGateway>,
    timezone: Tz,
}

impl TailorTalkService {
    pub fn new(
        config: &AppConfig,
        extractor: Arc<dyn IntentExtractor>,
        gateway: Arc<dyn CalendarGateway>,
    ) -> ServiceResult<Self> {
        let settings = EngineSettings::from_config(&config.scheduling)?;
        let timezone = settings.timezone;
        let engine = DialogueEngine::new(settings, gateway.clone());
        let store = SessionStore::new(std::time::Duration::from_secs(config.session.ttl_secs));

        info!(
            timezone = %config.scheduling.timezone,
            max_offers = config.scheduling.max_offers,
            "Dialogue engine initialized"
        );

        Ok(Self {
            engine,
            store,
            extractor,
            gateway,
            timezone,
        })
    }

    /// Handle one conversation turn for a session.
    ///
    /// Extraction and the engine transition run while holding this
    /// session's guard, so turns for the same id are processed in arrival
    /// order; other sessions are unaffected. If extraction fails, the state
    /// is left untouched and the same turn can be retried.
    pub async fn process_turn(&self, session_id: &str, utterance: &str) -> AgentResponse {
        let now = Utc::now();
        let mut guard = self.store.checkout(session_id, now).await;

        let context = ExtractionContext {
            now,
            timezone: self.timezone,
            stage: guard.stage,
            offered_slots: guard.offered_slots.clone(),
        };

        let intent = match self.extractor.extract(utterance, &context).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Intent extraction failed");
                return AgentResponse {
                    text: replies::transient_failure(),
                    offered_slots: guard.offered_slots.clone(),
                    stage: guard.stage,
                };
            }
        };

        let (mut next, response) = self.engine.handle_turn(&guard, &intent).await;
        next.last_updated = Utc::now().max(guard.last_updated);
        *guard = next;

        response
    }

    /// Current state of a session, if it exists
    pub async fn session(&self, session_id: &str) -> ServiceResult<ConversationState> {
        self.store
            .snapshot(session_id)
            .await
            .ok_or_else(|| ServiceError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Drop a session; idempotent
    pub fn end_session(&self, session_id: &str) -> bool {
        let removed = self.store.remove(session_id);
        if removed {
            info!(session_id = %session_id, "Session removed");
        }
        removed
    }

    /// Evict sessions idle past the configured TTL
    pub fn evict_idle_sessions(&self) -> usize {
        self.store.evict_idle(Utc::now())
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }
}
