//! In-memory transports and factories for exercising the proxy core

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use sb_config::TransportConfig;
use sb_types::{AppError, AppResult};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND};
use crate::transport::{Transport, TransportFactory};

pub(crate) type Handler = Arc<dyn Fn(&JsonRpcRequest) -> JsonRpcResponse + Send + Sync>;

/// Scripted connection behavior for one mock server
#[derive(Clone)]
pub(crate) enum MockBehavior {
    /// Every connection attempt fails
    Unreachable,
    /// The first n attempts fail, then connections succeed
    FailThen(usize, Handler),
    /// Connections always succeed
    Respond(Handler),
    /// Connections succeed; every request takes this long to answer
    Slow(std::time::Duration, Handler),
}

pub(crate) struct MockTransport {
    handler: Handler,
    delay: Option<std::time::Duration>,
    alive: AtomicBool,
    close_count: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> AppResult<JsonRpcResponse> {
        if !self.is_alive() {
            return Err(AppError::Connection("mock transport closed".to_string()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
            if !self.is_alive() {
                return Err(AppError::Connection("mock transport closed".to_string()));
            }
        }
        let mut response = (self.handler)(&request);
        response.id = request.id.unwrap_or(Value::Null);
        Ok(response)
    }

    async fn send_notification(&self, _notification: JsonRpcNotification) -> AppResult<()> {
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> AppResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory keyed by the config's command or URL string
pub(crate) struct MockFactory {
    behaviors: HashMap<String, MockBehavior>,
    attempts: dashmap::DashMap<String, usize>,
    pub connect_count: Arc<AtomicUsize>,
    pub close_count: Arc<AtomicUsize>,
}

impl MockFactory {
    pub fn new(behaviors: Vec<(&str, MockBehavior)>) -> Self {
        Self {
            behaviors: behaviors
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            attempts: dashmap::DashMap::new(),
            connect_count: Arc::new(AtomicUsize::new(0)),
            close_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn config_key(config: &TransportConfig) -> &str {
        match config {
            TransportConfig::Stdio { command, .. } => command,
            TransportConfig::Sse { url } | TransportConfig::StreamableHttp { url } => url,
        }
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn connect(&self, config: &TransportConfig) -> AppResult<Box<dyn Transport>> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let key = Self::config_key(config);
        let attempt = {
            let mut entry = self.attempts.entry(key.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let behavior = self
            .behaviors
            .get(key)
            .ok_or_else(|| AppError::Connection(format!("no mock behavior for '{}'", key)))?;

        let (handler, delay) = match behavior {
            MockBehavior::Unreachable => {
                return Err(AppError::Connection(format!("{} unreachable", key)));
            }
            MockBehavior::FailThen(n, handler) => {
                if attempt <= *n {
                    return Err(AppError::Connection(format!(
                        "{} unreachable (attempt {})",
                        key, attempt
                    )));
                }
                (handler.clone(), None)
            }
            MockBehavior::Respond(handler) => (handler.clone(), None),
            MockBehavior::Slow(delay, handler) => (handler.clone(), Some(*delay)),
        };

        Ok(Box::new(MockTransport {
            handler,
            delay,
            alive: AtomicBool::new(true),
            close_count: self.close_count.clone(),
        }))
    }
}

/// Stdio config pointing at a named mock server
pub(crate) fn mock_config(key: &str) -> TransportConfig {
    TransportConfig::Stdio {
        command: key.to_string(),
        args: vec![],
        env: vec![],
    }
}

/// Handler whose `tools/call` reply names the answering server, for tests
/// that need to tell collided targets apart.
pub(crate) fn tagged_tool_server(server_name: &str, tools: Vec<(&str, &str)>) -> Handler {
    let inner = tool_server(server_name, tools);
    let tag = server_name.to_string();
    Arc::new(move |request: &JsonRpcRequest| {
        let mut response = inner(request);
        if request.method == "tools/call" {
            if let Some(result) = response.result.as_mut() {
                result["content"][0]["text"] = json!(format!(
                    "{}: {}",
                    tag,
                    result["content"][0]["text"].as_str().unwrap_or("")
                ));
            }
        }
        response
    })
}

/// Handler for a server exposing the given tools. `tools/call` answers with
/// a text content block of the form "Tool <name>: <text arg>".
pub(crate) fn tool_server(server_name: &str, tools: Vec<(&str, &str)>) -> Handler {
    let server_name = server_name.to_string();
    let tools: Vec<(String, String)> = tools
        .into_iter()
        .map(|(n, d)| (n.to_string(), d.to_string()))
        .collect();

    Arc::new(move |request: &JsonRpcRequest| {
        let id = request.id.clone().unwrap_or(Value::Null);
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": server_name, "version": "1.0.0" }
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => {
                let tools: Vec<Value> = tools
                    .iter()
                    .map(|(name, description)| {
                        json!({
                            "name": name,
                            "description": description,
                            "inputSchema": { "type": "object" }
                        })
                    })
                    .collect();
                JsonRpcResponse::success(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = request.params.clone().unwrap_or_default();
                let name = params["name"].as_str().unwrap_or("unknown");
                let text = params["arguments"]["text"].as_str().unwrap_or("");
                if !tools.iter().any(|(n, _)| n == name) {
                    return JsonRpcResponse::error(id, -32602, format!("Unknown tool: {}", name));
                }
                JsonRpcResponse::success(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": format!("Tool {}: {}", name, text) }]
                    }),
                )
            }
            "resources/list" => JsonRpcResponse::success(id, json!({ "resources": [] })),
            "resources/templates/list" => {
                JsonRpcResponse::success(id, json!({ "resourceTemplates": [] }))
            }
            "prompts/list" => JsonRpcResponse::success(id, json!({ "prompts": [] })),
            other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Unknown: {}", other)),
        }
    })
}
