use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::services::reminders::spawn_reminder_worker;
use appointment_cell::AppointmentState;
use shared_config::AppConfig;
use shared_database::DocumentStore;

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

    info!("Starting clinic scheduling API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());
    let store = DocumentStore::connect(&config).await?;

    let appointments = AppointmentState::new(store, config.clone());
    let reminder_worker = spawn_reminder_worker(
        appointments.reminders.clone(),
        Duration::from_secs(config.reminder_interval_seconds),
    );

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(appointments)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    reminder_worker.abort();
    Ok(())
}
