//! Proxy definition store and instance cache
//!
//! Definitions are the persisted configuration; instances are live
//! `ProxyCore`s opened on demand. Opening is single-flight: concurrent `get`
//! calls for the same proxy share one connection attempt.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use sb_config::{load_proxies, save_proxies, ProxyDefinition, ServerDefinition};
use sb_types::{slugify, AppError, AppResult};

use crate::core::ProxyCore;
use crate::transport::TransportFactory;

pub struct ProxyStore {
    config_path: PathBuf,
    factory: Arc<dyn TransportFactory>,
    definitions: RwLock<Vec<ProxyDefinition>>,
    instances: DashMap<String, Arc<OnceCell<Arc<ProxyCore>>>>,
}

impl ProxyStore {
    pub fn new(config_path: PathBuf, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config_path,
            factory,
            definitions: RwLock::new(Vec::new()),
            instances: DashMap::new(),
        }
    }

    /// Load persisted definitions from disk
    pub async fn load(&self) -> AppResult<()> {
        let proxies = load_proxies(&self.config_path).await?;
        *self.definitions.write() = proxies;
        Ok(())
    }

    async fn save(&self) -> AppResult<()> {
        let snapshot = self.definitions.read().clone();
        save_proxies(&self.config_path, &snapshot).await
    }

    pub fn list(&self) -> Vec<ProxyDefinition> {
        self.definitions.read().clone()
    }

    pub fn get_definition(&self, id: &str) -> AppResult<ProxyDefinition> {
        self.definitions
            .read()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Proxy '{}' not found", id)))
    }

    /// Create a proxy definition. The id is derived from the name and is
    /// stable for the proxy's lifetime.
    pub async fn create(
        &self,
        name: String,
        description: Option<String>,
        servers: Vec<ServerDefinition>,
    ) -> AppResult<ProxyDefinition> {
        let id = slugify(&name);
        if id.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Proxy name '{}' does not produce a usable id",
                name
            )));
        }
        validate_servers(&servers)?;

        let definition = ProxyDefinition {
            id: id.clone(),
            name,
            description,
            servers,
        };

        {
            let mut definitions = self.definitions.write();
            if definitions.iter().any(|p| p.id == id) {
                return Err(AppError::BadRequest(format!(
                    "Proxy '{}' already exists",
                    id
                )));
            }
            definitions.push(definition.clone());
        }

        self.save().await?;
        info!("Created proxy '{}'", id);
        Ok(definition)
    }

    /// Update a definition in place. The id never changes, even on rename.
    /// A live instance is closed so the next `get` reopens with the new
    /// configuration.
    pub async fn update(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
        servers: Option<Vec<ServerDefinition>>,
    ) -> AppResult<ProxyDefinition> {
        if let Some(servers) = &servers {
            validate_servers(servers)?;
        }

        let updated = {
            let mut definitions = self.definitions.write();
            let definition = definitions
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| AppError::NotFound(format!("Proxy '{}' not found", id)))?;

            if let Some(name) = name {
                definition.name = name;
            }
            if let Some(description) = description {
                definition.description = Some(description);
            }
            if let Some(servers) = servers {
                definition.servers = servers;
            }
            definition.clone()
        };

        self.save().await?;
        self.close_instance(id).await;
        info!("Updated proxy '{}'", id);
        Ok(updated)
    }

    /// Delete a definition and close its instance if one is open
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        {
            let mut definitions = self.definitions.write();
            let before = definitions.len();
            definitions.retain(|p| p.id != id);
            if definitions.len() == before {
                return Err(AppError::NotFound(format!("Proxy '{}' not found", id)));
            }
        }

        self.save().await?;
        self.close_instance(id).await;
        info!("Deleted proxy '{}'", id);
        Ok(())
    }

    /// Live instance for a proxy, opening it on first use.
    ///
    /// Concurrent callers share one open; everyone gets the same instance.
    pub async fn get(&self, id: &str) -> AppResult<Arc<ProxyCore>> {
        let definition = self.get_definition(id)?;

        let cell = self
            .instances
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let factory = self.factory.clone();
        let instance = cell
            .get_or_try_init(|| async move { ProxyCore::open(&definition, factory).await })
            .await?
            .clone();

        // A delete may have raced the open; a live instance must not stay
        // cached for a definition that no longer exists.
        if self.get_definition(id).is_err() {
            self.instances.remove(id);
            if let Err(e) = instance.close().await {
                warn!("Failed to close proxy '{}' after racing delete: {}", id, e);
            }
            return Err(AppError::NotFound(format!("Proxy '{}' not found", id)));
        }

        Ok(instance)
    }

    /// Close and forget a live instance, if any
    async fn close_instance(&self, id: &str) {
        if let Some((_, cell)) = self.instances.remove(id) {
            if let Some(instance) = cell.get() {
                debug!("Closing instance for proxy '{}'", id);
                if let Err(e) = instance.close().await {
                    tracing::warn!("Failed to close proxy '{}': {}", id, e);
                }
            }
        }
    }

    /// Close every live instance. Used on shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        info!("Closing {} proxy instances", ids.len());
        for id in ids {
            self.close_instance(&id).await;
        }
    }
}

fn validate_servers(servers: &[ServerDefinition]) -> AppResult<()> {
    let mut seen = HashSet::new();
    for server in servers {
        if server.name.is_empty() {
            return Err(AppError::BadRequest(
                "Server name must not be empty".to_string(),
            ));
        }
        if !seen.insert(server.name.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Duplicate server name '{}'",
                server.name
            )));
        }
    }
    Ok(())
}
