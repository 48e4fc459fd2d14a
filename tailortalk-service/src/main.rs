use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

mod api;
mod calendar;
mod config;
mod engine;
mod error;
mod intent;
mod service;
mod session;
mod slots;

use crate::calendar::{CalendarGateway, HttpCalendarGateway, InMemoryCalendar};
use crate::config::CalendarBackend;
use crate::intent::LlmIntentExtractor;
use crate::service::TailorTalkService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!(
        "Starting TailorTalk service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let app_config = config::load_config()?;
    info!(
        host = %app_config.server.host,
        port = app_config.server.port,
        timezone = %app_config.scheduling.timezone,
        "Configuration loaded"
    );

    // Pick the calendar backend
    let gateway: Arc<dyn CalendarGateway> = match app_config.calendar.backend {
        CalendarBackend::Http => {
            info!(url = %app_config.calendar.base_url, "Using HTTP calendar backend");
            Arc::new(HttpCalendarGateway::new(app_config.calendar.clone())?)
        }
        CalendarBackend::Memory => {
            info!("Using in-memory calendar backend");
            Arc::new(InMemoryCalendar::new())
        }
    };

    let extractor = Arc::new(LlmIntentExtractor::new(app_config.extractor.clone())?);
    info!(
        url = %app_config.extractor.base_url,
        model = %app_config.extractor.model,
        "Intent extractor initialized"
    );

    let service = Arc::new(TailorTalkService::new(&app_config, extractor, gateway)?);

    // Evict idle sessions in the background
    let eviction_service = service.clone();
    let eviction_interval =
        std::time::Duration::from_secs(app_config.session.eviction_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(eviction_interval);
        loop {
            interval.tick().await;
            let evicted = eviction_service.evict_idle_sessions();
            if evicted > 0 {
                info!(removed = evicted, "Evicted idle sessions");
            }
        }
    });

    let app = api::router(service);

    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tailortalk_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
