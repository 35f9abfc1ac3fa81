//! Streamable HTTP transport
//!
//! The modern MCP HTTP transport: each request is a single POST. The server
//! answers either with a JSON body or with a short-lived SSE body carrying
//! the response. Session state is threaded via the Mcp-Session-Id header.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use sb_types::{AppError, AppResult};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::sse::SseParser;
use crate::transport::Transport;

const SESSION_HEADER: &str = "Mcp-Session-Id";

pub struct StreamableHttpTransport {
    http_client: reqwest::Client,
    url: String,
    session_id: parking_lot::Mutex<Option<String>>,
    alive: AtomicBool,
}

impl StreamableHttpTransport {
    pub fn new(http_client: reqwest::Client, url: String) -> Self {
        Self {
            http_client,
            url,
            session_id: parking_lot::Mutex::new(None),
            alive: AtomicBool::new(true),
        }
    }

    fn builder(&self, body: &impl serde::Serialize) -> reqwest::RequestBuilder {
        let mut builder = self
            .http_client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.lock().as_ref() {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder
    }

    fn capture_session(&self, response: &reqwest::Response) {
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut guard = self.session_id.lock();
            if guard.as_deref() != Some(session) {
                debug!("Streamable HTTP session established: {}", session);
                *guard = Some(session.to_string());
            }
        }
    }

    /// Drain an SSE response body until the JSON-RPC response appears
    async fn read_sse_body(
        response: reqwest::Response,
        expected_id: &Value,
    ) -> AppResult<JsonRpcResponse> {
        let mut parser = SseParser::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| AppError::Connection(format!("SSE body error: {}", e)))?;
            for event in parser.push(&chunk) {
                let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
                    warn!("Unparseable SSE body event");
                    continue;
                };
                let is_response = value.get("result").is_some() || value.get("error").is_some();
                if is_response && value.get("id") == Some(expected_id) {
                    return Ok(serde_json::from_value(value)?);
                }
            }
        }

        Err(AppError::Connection(
            "SSE body ended without a response".to_string(),
        ))
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> AppResult<JsonRpcResponse> {
        if !self.is_alive() {
            return Err(AppError::Connection("Transport is closed".to_string()));
        }

        let expected_id = request.id.clone().unwrap_or(Value::Null);

        // No local timeout; slow tools are the server's business
        let response = self
            .builder(&request)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("POST to {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Connection(format!(
                "{} returned HTTP {}",
                self.url,
                response.status()
            )));
        }

        self.capture_session(&response);

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/event-stream"))
            .unwrap_or(false);

        if is_event_stream {
            Self::read_sse_body(response, &expected_id).await
        } else {
            response
                .json::<JsonRpcResponse>()
                .await
                .map_err(|e| AppError::Connection(format!("Invalid response body: {}", e)))
        }
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> AppResult<()> {
        if !self.is_alive() {
            return Err(AppError::Connection("Transport is closed".to_string()));
        }
        let response = self
            .builder(&notification)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("POST to {} failed: {}", self.url, e)))?;
        self.capture_session(&response);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> AppResult<()> {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // Best-effort session teardown
        let session = self.session_id.lock().take();
        if let Some(session) = session {
            let _ = self
                .http_client
                .delete(&self.url)
                .header(SESSION_HEADER, session)
                .send()
                .await;
        }
        Ok(())
    }
}
