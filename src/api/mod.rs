//! HTTP API
//!
//! axum routes over the [`AuditService`]. Every JSON response carries a
//! `success` flag; failures add `message` and `error`.

pub mod error;
pub mod integrity;
pub mod logs;
pub mod stream;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::audit::service::AuditService;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub service: AuditService,
}

impl AppState {
    pub fn new(service: AuditService) -> Self {
        Self { service }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/audit/logs", get(logs::list_logs).post(logs::append_log))
        .route("/audit/sync", post(logs::sync_log))
        .route("/audit/verify-integrity", get(integrity::verify_integrity))
        .route("/audit/statistics", get(integrity::statistics))
        .route("/audit/stream", get(stream::stream_events))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ledger = state.service.ledger();
    Json(serde_json::json!({
        "success": true,
        "status": "healthy",
        "service": "audit-ledger",
        "timestamp": chrono::Utc::now(),
        "records": ledger.committed_head().map(|id| id.value()).unwrap_or(0),
        "subscribers": ledger.broadcaster().subscriber_count(),
    }))
}
