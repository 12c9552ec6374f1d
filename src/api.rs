//! HTTP API for the Vigil agent.
//!
//! Always serves the health endpoint; in direct mode also accepts framed
//! credential streams POSTed to `/`, which are appended to the parser
//! input.

use crate::parser::FrameParser;
use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

// ── Handlers ────────────────────────────────────────────────────

/// GET /health — health check endpoint.
async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

/// POST / — direct-mode ingest of a framed credential stream.
async fn ingest(State(parser): State<Arc<FrameParser>>, body: Bytes) -> StatusCode {
    let accepted = parser.parse_stream(&body);
    debug!("direct ingest accepted {accepted} frames");
    StatusCode::NO_CONTENT
}

// ── Router ──────────────────────────────────────────────────────

/// Build the axum router with CORS enabled.
pub fn build_router(parser: Arc<FrameParser>, direct: bool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let mut router = Router::new().route("/health", get(health));
    if direct {
        router = router.route("/", post(ingest));
    }
    router.layer(cors).with_state(parser)
}

// ── Tests ───────────────────────────────────────────────────────
