//! Intent extraction.
//!
//! Maps a raw utterance plus conversation context to a structured
//! `ParsedIntent`. The extraction itself is delegated to a language model
//! speaking the Ollama chat protocol; anything the model cannot express as
//! valid intent JSON degrades to `Unrecognized`, never an error.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calendar::TimeSlot;
use crate::config::ExtractorConfig;
use crate::error::{ExtractorError, ServiceError, ServiceResult};
use crate::session::Stage;

/// What the user is trying to do this turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    RequestBooking,
    ProvideConstraint,
    SelectSlot,
    Confirm,
    Cancel,
    Modify,
    #[default]
    Unrecognized,
}

/// Structured reading of one utterance.
///
/// Every field is best effort; the engine never assumes completeness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedIntent {
    #[serde(default)]
    pub action: IntentAction,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participants: BTreeSet<String>,
    #[serde(default)]
    pub earliest: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    /// 1-based index into the offered slot list, for `SelectSlot`
    #[serde(default)]
    pub selected_index: Option<usize>,
}

impl ParsedIntent {
    pub fn unrecognized() -> Self {
        Self::default()
    }
}

/// Conversation context handed to the extractor alongside the utterance
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub now: DateTime<Utc>,
    pub timezone: Tz,
    pub stage: Stage,
    pub offered_slots: Vec<TimeSlot>,
}

/// Boundary to the natural-language capability
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    /// Never fails on unparseable input; `Err` is reserved for the transport
    async fn extract(
        &self,
        utterance: &str,
        context: &ExtractionContext,
    ) -> Result<ParsedIntent, ExtractorError>;
}

/// LLM-backed extractor using the Ollama chat API
pub struct LlmIntentExtractor {
    client: Client,
    config: ExtractorConfig,
}

impl LlmIntentExtractor {
    pub fn new(config: ExtractorConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Internal {
                message: format!("Failed to build extractor HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    fn system_prompt(context: &ExtractionContext) -> String {
        let now_local = context.now.with_timezone(&context.timezone);

        let mut prompt = format!(
            "You convert one user message from an appointment-booking conversation \
             into a single JSON object with the fields: \
             action (one of request_booking, provide_constraint, select_slot, \
             confirm, cancel, modify, unrecognized), \
             title (string or null), participants (array of strings), \
             earliest and latest (RFC 3339 timestamps or null), \
             duration_minutes (integer or null), \
             selected_index (1-based integer or null).\n\
             Resolve relative dates against the current time: {}.\n\
             All times are in the {} timezone.\n\
             Do not invent values the user did not state. \
             If the message is unrelated to booking, use action unrecognized.\n\
             Conversation stage: {:?}.\n",
            now_local.to_rfc3339(),
            context.timezone,
            context.stage,
        );

        if !context.offered_slots.is_empty() {
            prompt.push_str("Slots currently offered to the user:\n");
            for (i, slot) in context.offered_slots.iter().enumerate() {
                prompt.push_str(&format!(
                    "{}. {} to {}\n",
                    i + 1,
                    slot.start.with_timezone(&context.timezone).to_rfc3339(),
                    slot.end.with_timezone(&context.timezone).to_rfc3339(),
                ));
            }
        }

        prompt
    }
}

#[async_trait]
impl IntentExtractor for LlmIntentExtractor {
    async fn extract(
        &self,
        utterance: &str,
        context: &ExtractionContext,
    ) -> Result<ParsedIntent, ExtractorError> {
        let url = format!("{}/api/chat", self.config.base_url);

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Self::system_prompt(context),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: utterance.to_string(),
                },
            ],
            stream: false,
            format: "json".to_string(),
            options: ChatOptions {
                temperature: Some(0.0),
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractorError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ExtractorError::Generation { status, message });
        }

        let body: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| ExtractorError::Connection {
                    url: url.clone(),
                    source: e,
                })?;

        match serde_json::from_str::<ParsedIntent>(&body.message.content) {
            Ok(intent) => {
                debug!(action = ?intent.action, "Intent extracted");
                Ok(intent)
            }
            Err(e) => {
                warn!(error = %e, "Model output was not valid intent JSON");
                Ok(ParsedIntent::unrecognized())
            }
        }
    }
}

// Ollama chat protocol types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: String,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}
