//! HTTP routes
//!
//! Management API:
//!   GET/POST   /proxies
//!   GET/PUT/DELETE /proxies/{id}
//!
//! Per-proxy MCP endpoints:
//!   GET  /{proxy_id}/sse      - SSE stream (legacy HTTP+SSE transport)
//!   POST /{proxy_id}/message  - request endpoint paired with the SSE stream
//!   POST /{proxy_id}/mcp      - plain JSON-RPC request/response
//!   GET  /{proxy_id}/status   - per-target diagnostics

mod mcp;
mod proxies;
mod sse;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/proxies", get(proxies::list).post(proxies::create))
        .route(
            "/proxies/{id}",
            get(proxies::get_one)
                .put(proxies::update)
                .delete(proxies::delete),
        )
        .route("/{proxy_id}/sse", get(sse::sse_handler))
        .route("/{proxy_id}/message", post(sse::message_handler))
        .route("/{proxy_id}/mcp", post(mcp::mcp_handler))
        .route("/{proxy_id}/status", get(mcp::status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
