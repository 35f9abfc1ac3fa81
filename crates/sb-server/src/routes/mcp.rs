//! Direct JSON-RPC endpoint and per-target diagnostics

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use sb_proxy::JsonRpcRequest;

use crate::error::ApiError;
use crate::state::AppState;

/// POST /{proxy_id}/mcp
///
/// Plain request/response JSON-RPC for clients that do not hold an SSE
/// stream (the streamable HTTP transport and the stdio bridge).
/// Notifications are acknowledged with 202 and no body.
pub async fn mcp_handler(
    State(state): State<AppState>,
    Path(proxy_id): Path<String>,
    Json(request): Json<JsonRpcRequest>,
) -> Result<Response, ApiError> {
    let core = state.store.get(&proxy_id).await?;

    match core.handle_request(request).await {
        Some(response) => Ok(Json(response).into_response()),
        None => Ok((StatusCode::ACCEPTED, "").into_response()),
    }
}

/// GET /{proxy_id}/status
///
/// Reports the connection state of every target, including targets that
/// failed to connect when the proxy opened.
pub async fn status_handler(
    State(state): State<AppState>,
    Path(proxy_id): Path<String>,
) -> Result<Response, ApiError> {
    let core = state.store.get(&proxy_id).await?;

    let body = json!({
        "proxy_id": proxy_id,
        "closed": core.is_closed(),
        "targets": core.target_status(),
        "checked_at": chrono::Utc::now(),
    });

    Ok(Json(body).into_response())
}
