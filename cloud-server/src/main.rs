//! Sentinel Cloud Server
//!
//! Hosted functions for Sentinel monitoring sessions and host agents.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SENTINEL CLOUD                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  /functions/v1            /api/v1 (JWT)        background    │
//! │  ┌──────────────────┐    ┌────────────────┐   ┌───────────┐  │
//! │  │ analyze-threat   │    │ threats        │   │ agent     │  │
//! │  │ send-threat-alert│    │ metrics        │   │ registry  │  │
//! │  │ system-metrics   │    │ agents         │   │ refresh   │  │
//! │  └────────┬─────────┘    └───────┬────────┘   └─────┬─────┘  │
//! │           │  AI gateway, Resend, Twilio             │        │
//! │           └──────────────┬──────────────────────────┘        │
//! │                          ▼                                   │
//! │                   ┌─────────────┐                            │
//! │                   │ PostgreSQL  │                            │
//! │                   └─────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod models;
mod handlers;
mod middleware;
mod registry;
mod services;
mod error;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post, put},
    middleware as axum_middleware,
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};

/// Samples loaded into the agent registry at start-up
const REGISTRY_SEED_LIMIT: i64 = 100;
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "sentinel_cloud=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("Sentinel Cloud Server starting ({})...", config.environment);
    tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
    if config.ai_gateway_key.is_none() {
        tracing::warn!("AI_GATEWAY_KEY not set; analyze-threat will fail");
    }
    if config.agent_key.is_none() && config.is_production() {
        tracing::warn!("AGENT_KEY not set; agent ingestion is open");
    }

    let pool = db::create_pool(&config.database_url).await
        .context("Failed to create database pool")?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await
        .context("Failed to run migrations")?;

    let registry = Arc::new(registry::AgentRegistry::new());
    match models::SystemMetric::list_recent(&pool, REGISTRY_SEED_LIMIT).await {
        Ok(recent) => registry.seed(&recent).await,
        Err(e) => tracing::warn!("Could not seed agent registry: {}", e),
    }
    registry.clone().spawn_refresh();

    let http = reqwest::Client::builder()
        .timeout(OUTBOUND_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let state = AppState {
        pool,
        config: config.clone(),
        http,
        registry,
    };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
    pub http: reqwest::Client,
    pub registry: Arc<registry::AgentRegistry>,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    // Hosted functions called by monitoring sessions
    let function_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/functions/v1/analyze-threat", post(handlers::analyze::analyze_threat))
        .route("/functions/v1/send-threat-alert", post(handlers::alerts::send_threat_alert));

    // Agent ingestion (shared agent key when configured)
    let agent_routes = Router::new()
        .route("/functions/v1/system-metrics", post(handlers::metrics::ingest))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_agent_key
        ));

    // Management routes (user JWT auth)
    let management_routes = Router::new()
        // Threats
        .route("/api/v1/threats", get(handlers::threats::list))
        .route("/api/v1/threats", post(handlers::threats::create))
        .route("/api/v1/threats/:id", get(handlers::threats::get))
        .route("/api/v1/threats/:id/status", put(handlers::threats::update_status))

        // Fleet
        .route("/api/v1/agents", get(handlers::agents::list))
        .route("/api/v1/metrics", get(handlers::metrics::list))
        .route("/api/v1/processes", get(handlers::metrics::processes))

        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user_auth
        ));

    Router::new()
        .merge(function_routes)
        .merge(agent_routes)
        .merge(management_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
