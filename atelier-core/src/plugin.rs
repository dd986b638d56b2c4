//! Plugin system for modular architecture

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{AtelierError, Result};
use crate::event::{EventBus, SystemEvent};

/// Core plugin trait that all plugins must implement
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Get the plugin name
    fn name(&self) -> &str;

    /// Get the plugin version
    fn version(&self) -> &str;

    /// Get plugin dependencies (other plugin names)
    fn dependencies(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Initialize the plugin with the given context
    async fn initialize(&mut self, context: &PluginContext) -> Result<()>;

    /// Shutdown the plugin gracefully
    async fn shutdown(&mut self) -> Result<()>;

    /// Get plugin status
    fn status(&self) -> PluginStatus {
        PluginStatus::Active
    }

    /// Get services provided by this plugin
    fn provided_services(&self) -> Vec<&str> {
        Vec::new()
    }
}

type SharedResources = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Context provided to plugins during initialization
#[derive(Clone)]
pub struct PluginContext {
    pub event_bus: Arc<dyn EventBus>,
    pub config: Arc<Config>,
    shared_resources: Arc<RwLock<SharedResources>>,
}

impl PluginContext {
    /// Create a new plugin context
    pub fn new(event_bus: Arc<dyn EventBus>, config: Arc<Config>) -> Self {
        Self {
            event_bus,
            config,
            shared_resources: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish a resource other plugins can look up by key
    pub async fn set_shared_resource<T>(&self, key: impl Into<String>, resource: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let key = key.into();
        tracing::debug!("Registering shared resource: {}", key);
        self.shared_resources.write().await.insert(key, resource);
    }

    /// Look up a shared resource; `None` when missing or of another type
    pub async fn get_shared_resource<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let resource = self.shared_resources.read().await.get(key).cloned()?;
        resource.downcast::<T>().ok()
    }

    pub async fn remove_shared_resource(&self, key: &str) -> bool {
        self.shared_resources.write().await.remove(key).is_some()
    }

    pub async fn list_shared_resources(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared_resources.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Plugin registry for managing loaded plugins
pub struct PluginRegistry {
    plugins: HashMap<String, Box<dyn Plugin>>,
    plugin_info: HashMap<String, PluginInfo>,
    load_order: Vec<String>,
}

impl PluginRegistry {
    /// Create a new plugin registry
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            plugin_info: HashMap::new(),
            load_order: Vec::new(),
        }
    }

    /// Shutdown all plugins in reverse load order
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down plugins");

        for plugin_name in self.load_order.iter().rev() {
            if let Some(plugin) = self.plugins.get_mut(plugin_name) {
                if let Err(e) = plugin.shutdown().await {
                    tracing::error!("Failed to shutdown plugin {}: {}", plugin_name, e);
                }
            }
        }

        self.plugins.clear();
        self.plugin_info.clear();
        self.load_order.clear();

        Ok(())
    }

    /// Register and initialize a plugin; its dependencies must already be loaded
    pub async fn register_plugin(
        &mut self,
        mut plugin: Box<dyn Plugin>,
        context: &PluginContext,
    ) -> Result<()> {
        let name = plugin.name().to_string();
        let version = plugin.version().to_string();

        if self.plugins.contains_key(&name) {
            return Err(AtelierError::Plugin(format!(
                "Plugin {} is already registered",
                name
            )));
        }

        tracing::info!("Registering plugin: {} v{}", name, version);

        for dep in plugin.dependencies() {
            if !self.plugins.contains_key(dep) {
                return Err(AtelierError::Plugin(format!(
                    "Plugin {} depends on {}, which is not loaded",
                    name, dep
                )));
            }
        }

        plugin.initialize(context).await?;

        let info = PluginInfo {
            name: name.clone(),
            version: version.clone(),
            status: plugin.status(),
            load_time: SystemTime::now(),
            dependencies: plugin
                .dependencies()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            provided_services: plugin
                .provided_services()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        self.plugin_info.insert(name.clone(), info);
        self.plugins.insert(name.clone(), plugin);
        self.load_order.push(name.clone());

        if let Err(e) = context
            .event_bus
            .publish_system_event(SystemEvent::plugin_loaded(name, version))
            .await
        {
            tracing::warn!("Failed to publish plugin loaded event: {}", e);
        }

        Ok(())
    }

    /// Get plugin information
    pub fn get_plugin_info(&self, name: &str) -> Option<&PluginInfo> {
        self.plugin_info.get(name)
    }

    /// List all loaded plugins in load order
    pub fn list_plugins(&self) -> Vec<&PluginInfo> {
        self.load_order
            .iter()
            .filter_map(|name| self.plugin_info.get(name))
            .collect()
    }

    /// Check if a plugin is loaded
    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Information about a loaded plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub status: PluginStatus,
    pub load_time: SystemTime,
    pub dependencies: Vec<String>,
    pub provided_services: Vec<String>,
}

/// Plugin status enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PluginStatus {
    Loading,
    Active,
    Error(String),
    Disabled,
}
