// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The health endpoint is public; the
// webhook endpoint requires a valid Bearer token checked via the `AuthBearer`
// extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::signal::SignalData;

// -----------------------------------------------------------------------------
// Router construction
// -----------------------------------------------------------------------------

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/webhook", post(webhook))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// -----------------------------------------------------------------------------
// Health (public)
// -----------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// -----------------------------------------------------------------------------
// Webhook (authenticated)
// -----------------------------------------------------------------------------

/// Receive one alert event and drive the decision flow.
///
/// Events for the same symbol are serialized through a per-symbol mutex;
/// events for different symbols run concurrently.
async fn webhook(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    // Peek at the symbol up front so the lock is held for the whole flow.
    // An unparseable payload skips locking; the processor rejects it anyway.
    let symbol = SignalData::parse(&payload).ok().map(|d| d.symbol);

    let response = match symbol {
        Some(symbol) => {
            info!(%symbol, "webhook accepted");
            let lock = state.symbol_lock(&symbol);
            let _guard = lock.lock().await;
            state.processor.process(&payload).await
        }
        None => state.processor.process(&payload).await,
    };

    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response))
}
