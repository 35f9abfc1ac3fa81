//! Upstream transports
//!
//! Each transport speaks JSON-RPC to one upstream MCP server. The factory
//! trait is the seam between connection logic and concrete transports so the
//! proxy core can be exercised against in-memory fakes.

mod sse;
mod stdio;
mod streamable_http;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

use async_trait::async_trait;

use sb_config::TransportConfig;
use sb_types::{AppError, AppResult};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// A live connection to one upstream MCP server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response
    async fn send_request(&self, request: JsonRpcRequest) -> AppResult<JsonRpcResponse>;

    /// Send a fire-and-forget notification
    async fn send_notification(&self, notification: JsonRpcNotification) -> AppResult<()>;

    /// Whether the underlying connection is still usable
    fn is_alive(&self) -> bool;

    /// Tear down the connection. Safe to call more than once.
    async fn close(&self) -> AppResult<()>;
}

/// Creates transports from configuration
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, config: &TransportConfig) -> AppResult<Box<dyn Transport>>;
}

/// Production factory: spawns processes and opens HTTP connections
pub struct DefaultTransportFactory {
    http_client: reqwest::Client,
}

impl DefaultTransportFactory {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }
}

impl Default for DefaultTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn connect(&self, config: &TransportConfig) -> AppResult<Box<dyn Transport>> {
        match config {
            TransportConfig::Stdio { env, .. } => {
                let (command, args) = config.parse_stdio_command().map_err(AppError::Config)?;

                // Resolve pass-through env var names against our own environment
                let mut resolved = std::collections::HashMap::new();
                for name in env {
                    match std::env::var(name) {
                        Ok(value) => {
                            resolved.insert(name.clone(), value);
                        }
                        Err(_) => {
                            tracing::warn!("Environment variable {} not set, skipping", name);
                        }
                    }
                }

                let transport = StdioTransport::spawn(command, args, resolved).await?;
                Ok(Box::new(transport))
            }
            TransportConfig::Sse { url } => {
                let transport = SseTransport::connect(self.http_client.clone(), url.clone()).await?;
                Ok(Box::new(transport))
            }
            TransportConfig::StreamableHttp { url } => {
                let transport = StreamableHttpTransport::new(self.http_client.clone(), url.clone());
                Ok(Box::new(transport))
            }
        }
    }
}
