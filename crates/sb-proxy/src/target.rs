//! One upstream server as seen by a proxy

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use sb_config::ServerDefinition;
use sb_types::{AppError, AppResult};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest};
use crate::transport::{Transport, TransportFactory};

/// Connection attempts before giving up on a target
const CONNECT_ATTEMPTS: usize = 3;
/// Pause after each failed attempt
const CONNECT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(2500);

/// MCP protocol revision we speak to upstreams
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A connected, initialized upstream server
pub struct TargetConnection {
    name: String,
    kind: &'static str,
    transport: Box<dyn Transport>,
    server_info: Value,
    protocol_version: String,
    closed: AtomicBool,
    next_id: AtomicU64,
    /// In-flight requests hold read guards; close takes the write guard so
    /// teardown waits for them to settle.
    active: tokio::sync::RwLock<()>,
}

impl TargetConnection {
    /// Connect to a target with retries, then run the MCP initialize handshake.
    ///
    /// Makes up to three attempts, pausing 2.5 seconds after each failure.
    pub async fn connect(
        factory: &dyn TransportFactory,
        definition: &ServerDefinition,
    ) -> AppResult<Self> {
        let mut last_error = AppError::Connection(format!("{}: no attempts made", definition.name));

        for attempt in 1..=CONNECT_ATTEMPTS {
            match Self::try_connect(factory, definition).await {
                Ok(connection) => {
                    info!(
                        "Connected to target '{}' ({}) on attempt {}",
                        definition.name,
                        definition.transport.kind(),
                        attempt
                    );
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(
                        "Target '{}' connect attempt {}/{} failed: {}",
                        definition.name, attempt, CONNECT_ATTEMPTS, e
                    );
                    last_error = e;
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
            }
        }

        Err(last_error)
    }

    async fn try_connect(
        factory: &dyn TransportFactory,
        definition: &ServerDefinition,
    ) -> AppResult<Self> {
        let transport = factory.connect(&definition.transport).await?;

        let connection = Self {
            name: definition.name.clone(),
            kind: definition.transport.kind(),
            transport,
            server_info: Value::Null,
            protocol_version: PROTOCOL_VERSION.to_string(),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            active: tokio::sync::RwLock::new(()),
        };

        connection.initialize().await
    }

    /// MCP handshake: initialize request followed by the initialized notification
    async fn initialize(mut self) -> AppResult<Self> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "switchboard",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await
            .map_err(|e| {
                AppError::Connection(format!("Initialize failed for '{}': {}", self.name, e))
            })?;

        if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
            self.protocol_version = version.to_string();
        }
        self.server_info = result.get("serverInfo").cloned().unwrap_or(Value::Null);

        self.transport
            .send_notification(JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        debug!(
            "Target '{}' initialized (protocol {})",
            self.name, self.protocol_version
        );
        Ok(self)
    }

    /// Send a request and return its result value.
    ///
    /// Upstream JSON-RPC errors surface as `AppError::Upstream` so callers can
    /// relay the original code and message.
    pub async fn request(&self, method: &str, params: Option<Value>) -> AppResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Connection(format!(
                "Target '{}' is closed",
                self.name
            )));
        }
        let _in_flight = self.active.read().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let response = self.transport.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(AppError::Upstream {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport_kind(&self) -> &'static str {
        self.kind
    }

    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.is_alive()
    }

    /// Tear down the transport. Repeated calls are no-ops.
    ///
    /// New requests are rejected immediately, but requests already in flight
    /// run to completion before the transport goes away.
    pub async fn close(&self) -> AppResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _drained = self.active.write().await;
        debug!("Closing target '{}'", self.name);
        self.transport.close().await
    }

    /// Build a target from a pre-connected transport, skipping the handshake.
    #[cfg(test)]
    pub(crate) fn for_tests(name: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.to_string(),
            kind: "stdio",
            transport,
            server_info: Value::Null,
            protocol_version: PROTOCOL_VERSION.to_string(),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            active: tokio::sync::RwLock::new(()),
        }
    }
}
