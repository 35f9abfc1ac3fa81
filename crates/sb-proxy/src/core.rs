//! Proxy instance: one virtual MCP server over many targets

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use sb_config::{ProxyDefinition, ServerDefinition};
use sb_types::{AppError, AppResult, McpPrompt, McpResource, McpResourceTemplate, McpTool};

use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::routers::{RoutingTable, TargetListing};
use crate::target::{TargetConnection, PROTOCOL_VERSION};
use crate::transport::TransportFactory;

/// Per-target diagnostic state
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub name: String,
    pub transport: String,
    /// "connected", "disconnected", or "failed"
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct TargetFailure {
    kind: &'static str,
    error: String,
}

/// A live proxy instance.
///
/// Opening a proxy connects all its targets; targets that cannot be reached
/// are recorded as failures and the proxy opens degraded rather than failing
/// outright. Only list requests build the routing table; call paths resolve
/// against the most recent listing and fail NotFound for anything it does
/// not map, including everything before the first list. Membership changes
/// drop the table.
pub struct ProxyCore {
    id: String,
    name: String,
    factory: Arc<dyn TransportFactory>,
    targets: DashMap<String, Arc<TargetConnection>>,
    failures: DashMap<String, TargetFailure>,
    routes: RwLock<Option<Arc<RoutingTable>>>,
    closed: AtomicBool,
}

impl ProxyCore {
    /// Connect all targets concurrently and build the instance
    pub async fn open(
        definition: &ProxyDefinition,
        factory: Arc<dyn TransportFactory>,
    ) -> AppResult<Arc<Self>> {
        info!(
            "Opening proxy '{}' with {} targets",
            definition.id,
            definition.servers.len()
        );

        let connects = definition.servers.iter().map(|server| {
            let factory = factory.clone();
            async move {
                let result = TargetConnection::connect(factory.as_ref(), server).await;
                (server, result)
            }
        });
        let settled = join_all(connects).await;

        let core = Self {
            id: definition.id.clone(),
            name: definition.name.clone(),
            factory,
            targets: DashMap::new(),
            failures: DashMap::new(),
            routes: RwLock::new(None),
            closed: AtomicBool::new(false),
        };

        for (server, result) in settled {
            match result {
                Ok(connection) => {
                    core.targets
                        .insert(server.name.clone(), Arc::new(connection));
                }
                Err(e) => {
                    warn!(
                        "Proxy '{}': target '{}' unreachable, opening degraded: {}",
                        definition.id, server.name, e
                    );
                    core.failures.insert(
                        server.name.clone(),
                        TargetFailure {
                            kind: server.transport.kind(),
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        Ok(Arc::new(core))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connect and attach a new target. Replaces a recorded failure with the
    /// same name; a connect failure is recorded and returned.
    pub async fn add_target(&self, server: &ServerDefinition) -> AppResult<()> {
        if self.is_closed() {
            return Err(AppError::Connection(format!(
                "Proxy '{}' is closed",
                self.id
            )));
        }
        if self.targets.contains_key(&server.name) {
            return Err(AppError::BadRequest(format!(
                "Target '{}' already exists",
                server.name
            )));
        }

        match TargetConnection::connect(self.factory.as_ref(), server).await {
            Ok(connection) => {
                self.failures.remove(&server.name);
                self.targets
                    .insert(server.name.clone(), Arc::new(connection));
                self.invalidate_routes().await;
                Ok(())
            }
            Err(e) => {
                self.failures.insert(
                    server.name.clone(),
                    TargetFailure {
                        kind: server.transport.kind(),
                        error: e.to_string(),
                    },
                );
                self.invalidate_routes().await;
                Err(e)
            }
        }
    }

    /// Detach a target and close it once its in-flight requests settle.
    ///
    /// Removal takes effect immediately for routing; calls already running
    /// against the target are left to finish.
    pub async fn remove_target(&self, name: &str) -> AppResult<()> {
        if let Some((_, connection)) = self.targets.remove(name) {
            self.invalidate_routes().await;
            let proxy_id = self.id.clone();
            tokio::spawn(async move {
                if let Err(e) = connection.close().await {
                    warn!("Proxy '{}': deferred target close failed: {}", proxy_id, e);
                }
            });
            return Ok(());
        }
        if self.failures.remove(name).is_some() {
            self.invalidate_routes().await;
            return Ok(());
        }
        Err(AppError::NotFound(format!("Target '{}' not found", name)))
    }

    /// Diagnostic state of every configured target
    pub fn target_status(&self) -> Vec<TargetStatus> {
        let mut statuses: Vec<TargetStatus> = self
            .targets
            .iter()
            .map(|entry| TargetStatus {
                name: entry.key().clone(),
                transport: entry.value().transport_kind().to_string(),
                state: if entry.value().is_alive() {
                    "connected".to_string()
                } else {
                    "disconnected".to_string()
                },
                error: None,
            })
            .collect();

        for entry in self.failures.iter() {
            statuses.push(TargetStatus {
                name: entry.key().clone(),
                transport: entry.value().kind.to_string(),
                state: "failed".to_string(),
                error: Some(entry.value().error.clone()),
            });
        }

        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Close all targets. Repeated calls are no-ops.
    pub async fn close(&self) -> AppResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing proxy '{}'", self.id);

        let connections: Vec<Arc<TargetConnection>> =
            self.targets.iter().map(|e| e.value().clone()).collect();
        let results = join_all(connections.iter().map(|c| c.close())).await;
        for result in results {
            if let Err(e) = result {
                warn!("Proxy '{}': target close failed: {}", self.id, e);
            }
        }

        self.targets.clear();
        self.failures.clear();
        *self.routes.write().await = None;
        Ok(())
    }

    /// Dispatch one client request. Notifications return `None`.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!("Proxy '{}': notification {}", self.id, request.method);
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        if self.is_closed() {
            return Some(JsonRpcResponse::error(
                id,
                INTERNAL_ERROR,
                format!("Proxy '{}' is closed", self.id),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize().await,
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list().await,
            "tools/call" => self.handle_tools_call(request.params).await,
            "resources/list" => self.handle_resources_list().await,
            "resources/templates/list" => self.handle_templates_list().await,
            "resources/read" => self.handle_resources_read(request.params).await,
            "prompts/list" => self.handle_prompts_list().await,
            "prompts/get" => self.handle_prompts_get(request.params).await,
            other => {
                return Some(JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                ));
            }
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => Self::error_response(id, &request.method, e),
        })
    }

    fn error_response(id: Value, method: &str, error: AppError) -> JsonRpcResponse {
        match error {
            AppError::Upstream { code, message } => JsonRpcResponse::error(id, code, message),
            AppError::NotFound(message) | AppError::BadRequest(message) => {
                JsonRpcResponse::error(id, INVALID_PARAMS, message)
            }
            other => JsonRpcResponse::error(
                id,
                INTERNAL_ERROR,
                format!("{} failed: {}", method, other),
            ),
        }
    }

    async fn handle_initialize(&self) -> AppResult<Value> {
        // Lowest protocol version across targets keeps every target usable
        let protocol_version = self
            .targets
            .iter()
            .map(|e| e.value().protocol_version().to_string())
            .min()
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string());

        Ok(json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": {},
                "prompts": {},
            },
            "serverInfo": {
                "name": "switchboard",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": self.build_instructions(),
        }))
    }

    fn build_instructions(&self) -> String {
        let mut connected: Vec<String> = self
            .targets
            .iter()
            .map(|e| format!("{} ({})", e.key(), e.value().transport_kind()))
            .collect();
        connected.sort();

        let mut text = format!(
            "Virtual MCP server '{}' aggregating {} upstream servers: {}.",
            self.name,
            connected.len(),
            connected.join(", ")
        );
        text.push_str(
            " Tool and prompt names are exposed bare when unique; \
             colliding names carry a 'server__' prefix.",
        );

        if !self.failures.is_empty() {
            let mut failed: Vec<String> = self
                .failures
                .iter()
                .map(|e| format!("{}: {}", e.key(), e.value().error))
                .collect();
            failed.sort();
            text.push_str(&format!(" Unavailable servers: {}.", failed.join("; ")));
        }

        text
    }

    async fn handle_tools_list(&self) -> AppResult<Value> {
        let table = self.rebuild_routes().await;
        Ok(json!({ "tools": table.tools }))
    }

    async fn handle_resources_list(&self) -> AppResult<Value> {
        let table = self.rebuild_routes().await;
        Ok(json!({ "resources": table.resources }))
    }

    async fn handle_templates_list(&self) -> AppResult<Value> {
        let table = self.rebuild_routes().await;
        Ok(json!({ "resourceTemplates": table.templates }))
    }

    async fn handle_prompts_list(&self) -> AppResult<Value> {
        let table = self.rebuild_routes().await;
        Ok(json!({ "prompts": table.prompts }))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> AppResult<Value> {
        let params = params.unwrap_or_default();
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest("tools/call requires a name".to_string()))?;

        let route = self
            .current_routes()
            .await
            .and_then(|table| table.route_tool(name).cloned())
            .ok_or_else(|| AppError::NotFound(format!("Unknown tool: {}", name)))?;

        let target = self.target(&route.target)?;
        target
            .request(
                "tools/call",
                Some(json!({
                    "name": route.original_name,
                    "arguments": params.get("arguments").cloned().unwrap_or(json!({})),
                })),
            )
            .await
    }

    async fn handle_resources_read(&self, params: Option<Value>) -> AppResult<Value> {
        let params = params.unwrap_or_default();
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest("resources/read requires a uri".to_string()))?;

        let target_name = self
            .current_routes()
            .await
            .and_then(|table| table.route_resource(uri).map(str::to_string))
            .ok_or_else(|| AppError::NotFound(format!("Unknown resource: {}", uri)))?;

        let target = self.target(&target_name)?;
        target
            .request("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    async fn handle_prompts_get(&self, params: Option<Value>) -> AppResult<Value> {
        let params = params.unwrap_or_default();
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest("prompts/get requires a name".to_string()))?;

        let route = self
            .current_routes()
            .await
            .and_then(|table| table.route_prompt(name).cloned())
            .ok_or_else(|| AppError::NotFound(format!("Unknown prompt: {}", name)))?;

        let target = self.target(&route.target)?;
        let mut forwarded = json!({ "name": route.original_name });
        if let Some(arguments) = params.get("arguments") {
            forwarded["arguments"] = arguments.clone();
        }
        target.request("prompts/get", Some(forwarded)).await
    }

    fn target(&self, name: &str) -> AppResult<Arc<TargetConnection>> {
        self.targets
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| AppError::Connection(format!("Target '{}' is not connected", name)))
    }

    async fn invalidate_routes(&self) {
        *self.routes.write().await = None;
    }

    /// The table produced by the most recent list, if any.
    ///
    /// Call paths never build a table themselves: a name is routable only
    /// after a list request exposed it.
    async fn current_routes(&self) -> Option<Arc<RoutingTable>> {
        self.routes.read().await.clone()
    }

    /// Fan out list requests to every connected target and swap in the result
    async fn rebuild_routes(&self) -> Arc<RoutingTable> {
        let targets: Vec<Arc<TargetConnection>> =
            self.targets.iter().map(|e| e.value().clone()).collect();

        let listings = join_all(targets.iter().map(|target| async move {
            TargetListing {
                target: target.name().to_string(),
                tools: fetch_list::<McpTool>(target, "tools/list", "tools").await,
                resources: fetch_list::<McpResource>(target, "resources/list", "resources").await,
                templates: fetch_list::<McpResourceTemplate>(
                    target,
                    "resources/templates/list",
                    "resourceTemplates",
                )
                .await,
                prompts: fetch_list::<McpPrompt>(target, "prompts/list", "prompts").await,
            }
        }))
        .await;

        let table = Arc::new(RoutingTable::build(listings));
        *self.routes.write().await = Some(table.clone());
        table
    }
}

/// Fetch one listing from a target. Targets that do not implement the method
/// or cannot be reached contribute an empty list.
async fn fetch_list<T: serde::de::DeserializeOwned>(
    target: &TargetConnection,
    method: &str,
    key: &str,
) -> Vec<T> {
    match target.request(method, None).await {
        Ok(result) => match result.get(key) {
            Some(items) => serde_json::from_value(items.clone()).unwrap_or_else(|e| {
                warn!("Target '{}': malformed {} result: {}", target.name(), method, e);
                Vec::new()
            }),
            None => Vec::new(),
        },
        Err(AppError::Upstream { code, .. }) if code == METHOD_NOT_FOUND => Vec::new(),
        Err(e) => {
            warn!("Target '{}': {} failed: {}", target.name(), method, e);
            Vec::new()
        }
    }
}
