use std::net::SocketAddr;
use std::sync::Arc;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::services::booking::AppointmentBookingService;
use appointment_cell::services::notification::{
    LogOnlyNotificationDispatcher, NotificationDispatcher, NotificationOutbox,
    WebhookNotificationDispatcher,
};
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting practice scheduling API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());
    let missing = config.missing_settings();
    if !missing.is_empty() {
        anyhow::bail!("Missing required configuration: {}", missing.join(", "));
    }
    info!("Conflict policy: {}, scheduling UTC offset: {} minutes",
          config.conflict_policy, config.scheduling_utc_offset_minutes);

    // Notification outbox, drained by a background worker
    let dispatcher: Arc<dyn NotificationDispatcher> = if config.is_notification_configured() {
        Arc::new(WebhookNotificationDispatcher::new(config.notification_webhook_url.clone()))
    } else {
        warn!("NOTIFICATION_WEBHOOK_URL not set, owner notifications will only be logged");
        Arc::new(LogOnlyNotificationDispatcher)
    };
    let (outbox, worker) = NotificationOutbox::channel(dispatcher);
    worker.spawn();

    let service = Arc::new(AppointmentBookingService::from_config(&config).with_outbox(outbox));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(Arc::clone(&config), service)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
