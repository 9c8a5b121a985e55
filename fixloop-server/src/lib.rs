pub mod cleanup;
pub mod config;
pub mod fix_generator;
pub mod git;
pub mod github;
pub mod orchestrator;
pub mod ports;
pub mod state;
pub mod status;
pub mod webhook;

use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use github::GitHubClient;
pub use orchestrator::{EventOutcome, InboundEvent, Orchestrator, OrchestratorSettings};
pub use state::{PrKey, PrStateStore};

pub fn get_bot_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub webhook_secret: String,
    pub status_auth_token: Option<String>,
}

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "fixloop",
        "version": get_bot_version()
    })))
}

/// Routes: `/health`, `/status` and the signed `/webhook`.
pub fn app_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status::status_handler))
        .merge(webhook::webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}
