//! Shared server state

use std::sync::Arc;

use dashmap::DashMap;

use sb_proxy::{JsonRpcResponse, ProxyStore};

type ResponseSender = tokio::sync::mpsc::UnboundedSender<JsonRpcResponse>;

/// Tracks active SSE connections so POSTed requests can answer on a stream.
///
/// Connections are scoped per proxy: each entry is one GET /{proxy_id}/sse
/// stream, keyed by the connection id named in the endpoint event. Delivery
/// prefers the tagged connection but falls back to any other live connection
/// of the same proxy.
pub struct SseConnectionRegistry {
    connections: DashMap<String, DashMap<String, ResponseSender>>,
}

impl SseConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection and get the receiver its SSE stream should drain
    pub fn register(
        &self,
        proxy_id: &str,
        connection_id: &str,
    ) -> tokio::sync::mpsc::UnboundedReceiver<JsonRpcResponse> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let proxy = self
            .connections
            .entry(proxy_id.to_string())
            .or_insert_with(DashMap::new);
        if proxy.insert(connection_id.to_string(), tx).is_some() {
            tracing::info!(
                "Replaced SSE connection {} for proxy '{}'",
                connection_id,
                proxy_id
            );
        }
        tracing::debug!(
            "Registered SSE connection {} for proxy '{}'",
            connection_id,
            proxy_id
        );
        rx
    }

    pub fn unregister(&self, proxy_id: &str, connection_id: &str) {
        if let Some(proxy) = self.connections.get(proxy_id) {
            if proxy.remove(connection_id).is_some() {
                tracing::debug!(
                    "Unregistered SSE connection {} for proxy '{}'",
                    connection_id,
                    proxy_id
                );
            }
        }
        self.connections
            .remove_if(proxy_id, |_, proxy| proxy.is_empty());
    }

    /// Deliver a response to the tagged connection, falling back to any other
    /// live connection of the same proxy. Returns false when the proxy has no
    /// connection left that can take it.
    pub fn deliver(
        &self,
        proxy_id: &str,
        connection_id: &str,
        response: JsonRpcResponse,
    ) -> bool {
        let Some(proxy) = self.connections.get(proxy_id) else {
            return false;
        };

        let mut response = response;
        if let Some(tx) = proxy.get(connection_id) {
            match tx.send(response) {
                Ok(()) => return true,
                Err(e) => response = e.0,
            }
        }

        for entry in proxy.iter() {
            if entry.key() == connection_id {
                continue;
            }
            match entry.value().send(response) {
                Ok(()) => {
                    tracing::debug!(
                        "SSE connection {} gone, delivered via {} instead",
                        connection_id,
                        entry.key()
                    );
                    return true;
                }
                Err(e) => response = e.0,
            }
        }

        false
    }
}

impl Default for SseConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ProxyStore>,
    pub sse_connections: Arc<SseConnectionRegistry>,
}

impl AppState {
    pub fn new(store: Arc<ProxyStore>) -> Self {
        Self {
            store,
            sse_connections: Arc::new(SseConnectionRegistry::new()),
        }
    }
}
