//! HTTP+SSE transport
//!
//! The legacy MCP HTTP transport: a long-lived GET delivers server events,
//! and requests are POSTed to a message endpoint announced by the first
//! `endpoint` event on the stream. Responses arrive back on the stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use sb_types::{AppError, AppResult};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;

const ENDPOINT_WAIT: std::time::Duration = std::time::Duration::from_secs(10);

/// One parsed SSE event
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental SSE wire-format parser. Events are separated by blank lines;
/// multiple `data:` lines within one event are joined with newlines.
///
/// Buffers raw bytes rather than text: network chunks can split a multi-byte
/// UTF-8 character, so decoding happens per complete frame only.
#[derive(Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let raw = String::from_utf8_lossy(&frame);

            let mut event_name = "message".to_string();
            let mut data_lines = Vec::new();
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event_name = rest.trim().to_string();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                }
                // comment lines (":") and other fields are ignored
            }

            if !data_lines.is_empty() {
                events.push(SseEvent {
                    event: event_name,
                    data: data_lines.join("\n"),
                });
            }
        }

        events
    }
}

/// Transport over the HTTP+SSE pairing
pub struct SseTransport {
    http_client: reqwest::Client,
    /// Resolved message endpoint from the `endpoint` event
    endpoint: reqwest::Url,
    pending: Arc<DashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the event stream and wait for the endpoint announcement
    pub async fn connect(http_client: reqwest::Client, url: String) -> AppResult<Self> {
        let base = reqwest::Url::parse(&url)
            .map_err(|e| AppError::Config(format!("Invalid SSE URL '{}': {}", url, e)))?;

        let response = http_client
            .get(base.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("SSE connect to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Connection(format!(
                "SSE connect to {} failed with HTTP {}",
                url,
                response.status()
            )));
        }

        let pending: Arc<DashMap<u64, oneshot::Sender<JsonRpcResponse>>> = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let pending_reader = pending.clone();
        let alive_reader = alive.clone();
        let reader = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut parser = SseParser::default();
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("SSE stream error: {}", e);
                        break;
                    }
                };
                for event in parser.push(&chunk) {
                    match event.event.as_str() {
                        "endpoint" => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(event.data);
                            }
                        }
                        _ => Self::dispatch_message(&pending_reader, &event.data),
                    }
                }
            }

            debug!("SSE stream ended");
            alive_reader.store(false, Ordering::SeqCst);
            pending_reader.clear();
        });

        // The server must announce the message endpoint before we can POST
        let endpoint_path = tokio::time::timeout(ENDPOINT_WAIT, endpoint_rx)
            .await
            .map_err(|_| {
                AppError::Connection(format!("No endpoint event from {} within 10s", url))
            })?
            .map_err(|_| AppError::Connection("SSE stream closed during handshake".to_string()))?;

        let endpoint = base.join(&endpoint_path).map_err(|e| {
            AppError::Connection(format!("Invalid endpoint '{}': {}", endpoint_path, e))
        })?;

        debug!("SSE transport connected, message endpoint: {}", endpoint);

        Ok(Self {
            http_client,
            endpoint,
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader: parking_lot::Mutex::new(Some(reader)),
        })
    }

    fn dispatch_message(pending: &DashMap<u64, oneshot::Sender<JsonRpcResponse>>, data: &str) {
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            warn!("Unparseable SSE message event");
            return;
        };

        let is_response = value.get("result").is_some() || value.get("error").is_some();
        if is_response {
            let Some(id) = value.get("id").and_then(Value::as_u64) else {
                warn!("SSE response with non-numeric id");
                return;
            };
            match serde_json::from_value::<JsonRpcResponse>(value) {
                Ok(response) => {
                    if let Some((_, tx)) = pending.remove(&id) {
                        let _ = tx.send(response);
                    }
                }
                Err(e) => warn!("Malformed SSE response: {}", e),
            }
        } else if let Some(method) = value.get("method").and_then(Value::as_str) {
            trace!("Notification from SSE server: {}", method);
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send_request(&self, mut request: JsonRpcRequest) -> AppResult<JsonRpcResponse> {
        if !self.is_alive() {
            return Err(AppError::Connection("SSE stream is closed".to_string()));
        }

        let original_id = request.id.clone().unwrap_or(Value::Null);
        let wire_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        request.id = Some(Value::from(wire_id));

        let (tx, rx) = oneshot::channel();
        self.pending.insert(wire_id, tx);

        let post = self
            .http_client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                self.pending.remove(&wire_id);
                AppError::Connection(format!("POST to SSE endpoint failed: {}", e))
            })?;

        if !post.status().is_success() {
            self.pending.remove(&wire_id);
            return Err(AppError::Connection(format!(
                "SSE endpoint returned HTTP {}",
                post.status()
            )));
        }

        // Some servers answer in the POST body instead of the stream
        if post.status() != reqwest::StatusCode::ACCEPTED {
            if let Ok(mut response) = post.json::<JsonRpcResponse>().await {
                self.pending.remove(&wire_id);
                response.id = original_id;
                return Ok(response);
            }
        }

        // No timeout on the response itself; the reader task drops the
        // sender when the stream ends, which fails the await.
        match rx.await {
            Ok(mut response) => {
                response.id = original_id;
                Ok(response)
            }
            Err(_) => Err(AppError::Connection(
                "SSE stream closed before responding".to_string(),
            )),
        }
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> AppResult<()> {
        if !self.is_alive() {
            return Err(AppError::Connection("SSE stream is closed".to_string()));
        }
        self.http_client
            .post(self.endpoint.clone())
            .json(&notification)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("POST to SSE endpoint failed: {}", e)))?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> AppResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_parser_single_event() {
        let mut parser = SseParser::default();
        let events = parser.push(b"event: endpoint\ndata: /message?connectionId=abc\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/message?connectionId=abc");
    }

    #[test]
    fn test_sse_parser_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"event: mess").is_empty());
        assert!(parser.push(b"age\ndata: {\"jsonrpc\"").is_empty());
        let events = parser.push(b":\"2.0\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\"}");
    }

    #[test]
    fn test_sse_parser_multibyte_char_split_across_chunks() {
        let frame = "data: {\"text\":\"héllo\"}\n\n".as_bytes();
        // Split inside the two-byte encoding of 'é'
        let split = frame.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut parser = SseParser::default();
        assert!(parser.push(&frame[..split]).is_empty());
        let events = parser.push(&frame[split..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"text\":\"héllo\"}");
    }

    #[test]
    fn test_sse_parser_multiline_data_and_defaults() {
        let mut parser = SseParser::default();
        let events = parser.push(b"data: line one\ndata: line two\n\n: comment\n\n");
        assert_eq!(events.len(), 1);
        // No event field defaults to "message"
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn test_sse_parser_multiple_events_one_chunk() {
        let mut parser = SseParser::default();
        let events = parser.push(b"event: endpoint\ndata: /msg\n\nevent: message\ndata: {}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[1].event, "message");
    }
}
