//! HTTP+SSE transport endpoints
//!
//! GET /{proxy_id}/sse opens the event stream. The first event is an
//! `endpoint` event carrying the paired message URL with the connection id.
//! POSTs to that URL are answered on a stream of the same proxy with 202
//! Accepted, or 400 when the proxy has no stream left.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{debug, info};

use sb_proxy::JsonRpcRequest;
use sb_types::AppError;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Client-supplied connection id; generated when absent
    #[serde(rename = "connectionId")]
    pub connection_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
}

/// GET /{proxy_id}/sse?connectionId=...
pub async fn sse_handler(
    State(state): State<AppState>,
    Path(proxy_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    // Opening the proxy here means the first POST finds it warm
    state.store.get(&proxy_id).await?;

    let connection_id = query
        .connection_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let mut rx = state.sse_connections.register(&proxy_id, &connection_id);

    let registry = state.sse_connections.clone();
    let endpoint = format!("/{}/message?connectionId={}", proxy_id, connection_id);
    info!(
        "SSE connection {} opened for proxy '{}'",
        connection_id, proxy_id
    );

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint));

        while let Some(response) = rx.recv().await {
            match serde_json::to_string(&response) {
                Ok(json) => {
                    yield Ok(Event::default().event("message").data(json));
                }
                Err(e) => {
                    tracing::warn!("Failed to serialize SSE response: {}", e);
                }
            }
        }

        debug!("SSE connection {} stream ended", connection_id);
        registry.unregister(&proxy_id, &connection_id);
    };

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// POST /{proxy_id}/message?connectionId=...
///
/// Responses go out on the tagged SSE stream, or any other stream of the
/// same proxy when that one is gone. No stream at all is a client error:
/// the SSE transport has nowhere to receive the answer.
pub async fn message_handler(
    State(state): State<AppState>,
    Path(proxy_id): Path<String>,
    Query(query): Query<MessageQuery>,
    Json(request): Json<JsonRpcRequest>,
) -> Result<Response, ApiError> {
    let core = state.store.get(&proxy_id).await?;

    let Some(response) = core.handle_request(request).await else {
        return Ok((StatusCode::ACCEPTED, "").into_response());
    };

    if state
        .sse_connections
        .deliver(&proxy_id, &query.connection_id, response)
    {
        Ok((StatusCode::ACCEPTED, "").into_response())
    } else {
        Err(ApiError(AppError::BadRequest(format!(
            "No SSE connection registered for proxy '{}'",
            proxy_id
        ))))
    }
}
