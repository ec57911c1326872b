mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;
mod utils;

use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{Config, MutableConfig};
use crate::db::Database;
use crate::services::{CalendarService, GoogleCalendarClient, GoogleConfig};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: MutableConfig,
    pub calendar: Arc<CalendarService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("🚀 Starting Jesko Calendar Backend");

    // Load configuration from environment
    let config = Config::from_env()?;
    info!("✅ Configuration loaded from environment");

    // Initialize database (Turso/libSQL)
    let db = Database::new(&config.database_url).await?;
    info!("✅ Database connected (Turso/libSQL)");

    // Run migrations
    db.run_migrations().await?;
    info!("✅ Database migrations completed");

    // Create shared HTTP client
    let http_client = reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .tcp_nodelay(true)
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    info!("✅ HTTP client initialized");

    // Calendar service with the OAuth client injected once at startup
    let google = GoogleCalendarClient::new(
        GoogleConfig::new(
            config.google_client_id.clone(),
            config.google_client_secret.clone(),
            config.oauth_redirect_uri(),
        ),
        http_client,
    );
    let calendar = Arc::new(CalendarService::new(db.clone(), google));
    info!("✅ Calendar service initialized");

    let state = Arc::new(AppState {
        db: db.clone(),
        config: Arc::new(RwLock::new(config.clone())),
        calendar,
    });

    let app = create_app(state);

    // Start server
    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));
    info!("🚀 Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router with routes and middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/db", get(health_check_db))
        .route("/api/config", get(get_app_config))
        .route("/api/version", get(get_app_version))
        .nest("/api/calendar", routes::calendar::create_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive().max_age(std::time::Duration::from_secs(3600))),
        )
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": true }))
}

async fn health_check_db(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, error::AppError> {
    let pool = state.db.pool();
    let conn = pool.lock().await;
    conn.execute("SELECT 1", ())
        .await
        .map_err(|e| error::AppError::Database(e.to_string()))?;

    Ok(Json(json!({ "status": true })))
}

async fn get_app_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = state.config.read().await;

    Json(json!({
        "status": true,
        "name": "Jesko Calendar",
        "version": env!("CARGO_PKG_VERSION"),
        "features": {
            "google_calendar": !config.google_client_id.is_empty(),
        }
    }))
}

async fn get_app_version() -> Json<serde_json::Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
