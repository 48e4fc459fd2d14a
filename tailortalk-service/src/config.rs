//! Service configuration.
//!
//! Loaded once at startup from an optional `config` file plus
//! `TAILORTALK`-prefixed environment variables. All scheduling behavior
//! (working hours, offer count, default duration) lives here so the engine
//! itself stays free of policy constants.

use chrono::NaiveTime;
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_scheduling")]
    pub scheduling: SchedulingConfig,

    #[serde(default = "default_session")]
    pub session: SessionConfig,

    #[serde(default = "default_extractor")]
    pub extractor: ExtractorConfig,

    #[serde(default = "default_calendar")]
    pub calendar: CalendarConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Slot-search policy
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    /// IANA timezone name for the resolved session timezone
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Start of the working day, "HH:MM"
    #[serde(default = "default_workday_start")]
    pub workday_start: String,

    /// End of the working day, "HH:MM"
    #[serde(default = "default_workday_end")]
    pub workday_end: String,

    /// Maximum number of slots offered per turn
    #[serde(default = "default_max_offers")]
    pub max_offers: usize,

    /// Applied when the user never states a duration
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: u32,
}

impl SchedulingConfig {
    pub fn timezone(&self) -> ServiceResult<Tz> {
        self.timezone.parse().map_err(|_| ServiceError::Config {
            message: format!("Invalid timezone: {}", self.timezone),
        })
    }

    pub fn working_hours(&self) -> ServiceResult<(NaiveTime, NaiveTime)> {
        let start = parse_hhmm(&self.workday_start)?;
        let end = parse_hhmm(&self.workday_end)?;
        if end <= start {
            return Err(ServiceError::Config {
                message: format!(
                    "workday_end ({}) must be after workday_start ({})",
                    self.workday_end, self.workday_start
                ),
            });
        }
        Ok((start, end))
    }
}

fn parse_hhmm(value: &str) -> ServiceResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| ServiceError::Config {
        message: format!("Invalid time of day (expected HH:MM): {}", value),
    })
}

/// Session store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are evicted
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the eviction task runs
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

/// Intent extractor (LLM) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_url")]
    pub base_url: String,

    #[serde(default = "default_extractor_model")]
    pub model: String,

    #[serde(default = "default_extractor_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Calendar backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarBackend {
    /// External calendar service over HTTP
    Http,
    /// Process-local calendar, for development and tests
    Memory,
}

/// Calendar gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_calendar_backend")]
    pub backend: CalendarBackend,

    #[serde(default = "default_calendar_url")]
    pub base_url: String,

    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,

    #[serde(default = "default_calendar_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Load configuration from file and env vars
pub fn load_config() -> ServiceResult<AppConfig> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("TAILORTALK")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })
}

// ==================== Default Value Functions ====================

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

pub(crate) fn default_scheduling() -> SchedulingConfig {
    SchedulingConfig {
        timezone: default_timezone(),
        workday_start: default_workday_start(),
        workday_end: default_workday_end(),
        max_offers: default_max_offers(),
        default_duration_minutes: default_duration_minutes(),
    }
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_workday_start() -> String {
    "09:00".to_string()
}

fn default_workday_end() -> String {
    "18:00".to_string()
}

fn default_max_offers() -> usize {
    3
}

fn default_duration_minutes() -> u32 {
    30
}

pub(crate) fn default_session() -> SessionConfig {
    SessionConfig {
        ttl_secs: default_session_ttl_secs(),
        eviction_interval_secs: default_eviction_interval_secs(),
    }
}

fn default_session_ttl_secs() -> u64 {
    1800
}

fn default_eviction_interval_secs() -> u64 {
    300
}

pub(crate) fn default_extractor() -> ExtractorConfig {
    ExtractorConfig {
        base_url: default_extractor_url(),
        model: default_extractor_model(),
        request_timeout_secs: default_extractor_timeout_secs(),
    }
}

fn default_extractor_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_extractor_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_extractor_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_calendar() -> CalendarConfig {
    CalendarConfig {
        backend: default_calendar_backend(),
        base_url: default_calendar_url(),
        calendar_id: default_calendar_id(),
        request_timeout_secs: default_calendar_timeout_secs(),
    }
}

fn default_calendar_backend() -> CalendarBackend {
    CalendarBackend::Memory
}

fn default_calendar_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_calendar_timeout_secs() -> u64 {
    10
}
