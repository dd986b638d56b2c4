//! Atelier Core - foundational engine of the Atelier code sandbox
//!
//! This crate provides the virtual file tree, the diagnostic model, storage ports,
//! and the event/plugin architecture the editor, preview and server crates build on.

pub mod album;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod event;
pub mod flat;
pub mod forum;
pub mod plugin;
pub mod storage;
pub mod tree;

pub use album::Album;
pub use config::{Config, EditorConfig, ServerConfig, StorageConfig, ValidationResult};
pub use diagnostic::{Diagnostic, Severity};
pub use error::{AtelierError, ErrorSeverity, Result};
pub use event::{
    EventBus, InMemoryEventBus, SubscriptionId, SystemEvent, SystemEventHandler, TreeChange,
};
pub use flat::FlatFileMap;
pub use forum::{ForumChannel, ForumFeed, ForumMessage, ForumPost, InMemoryForum};
pub use plugin::{Plugin, PluginContext, PluginInfo, PluginRegistry, PluginStatus};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
pub use tree::{FileEntry, FileNode, FileTree, FolderEntry, NodeId, NodeKind, TreeError};

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;

/// Core engine that owns the event bus and the plugin registry
pub struct CoreEngine {
    event_bus: Arc<dyn EventBus>,
    plugin_registry: PluginRegistry,
    context: PluginContext,
    config: Arc<Config>,
    shutdown_signal: Arc<Notify>,
}

impl CoreEngine {
    /// Create a new CoreEngine instance
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let event_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let config = Arc::new(config);
        let context = PluginContext::new(event_bus.clone(), config.clone());

        Ok(Self {
            event_bus,
            plugin_registry: PluginRegistry::new(),
            context,
            config,
            shutdown_signal: Arc::new(Notify::new()),
        })
    }

    /// Register a plugin; plugins are initialized in registration order
    pub async fn register_plugin(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        self.plugin_registry
            .register_plugin(plugin, &self.context)
            .await
    }

    /// Context shared with every registered plugin
    pub fn plugin_context(&self) -> &PluginContext {
        &self.context
    }

    /// Run until Ctrl+C, SIGTERM or a shutdown request
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("Starting Atelier Core Engine");

        let requested = self.shutdown_signal.clone();
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Shutdown signal received");
            }
            _ = requested.notified() => {
                tracing::info!("Shutdown requested programmatically");
            }
        }

        self.shutdown().await?;

        tracing::info!("Atelier Core Engine stopped");
        Ok(())
    }

    /// Handle that stops [`CoreEngine::run`]; a request made before `run` is kept
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown_signal.clone()
    }

    /// Request shutdown of a running engine
    pub fn request_shutdown(&self) {
        self.shutdown_signal.notify_one();
    }

    /// Shutdown all plugins, bounded by a timeout
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down Atelier Core Engine");

        let shutdown_timeout = Duration::from_secs(30);
        match tokio::time::timeout(shutdown_timeout, self.plugin_registry.shutdown()).await {
            Ok(Err(e)) => tracing::error!("Plugin registry shutdown failed: {}", e),
            Ok(Ok(())) => {}
            Err(_) => tracing::error!(
                "Plugin registry shutdown timed out after {:?}",
                shutdown_timeout
            ),
        }

        Ok(())
    }

    /// Get a reference to the event bus
    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        self.event_bus.clone()
    }

    /// Get a reference to the plugin registry
    pub fn plugin_registry(&self) -> &PluginRegistry {
        &self.plugin_registry
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> Arc<Config> {
        self.config.clone()
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_rejects_invalid_config() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(matches!(CoreEngine::new(config), Err(AtelierError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_request() {
        let mut engine = CoreEngine::new(Config::default()).unwrap();
        engine.request_shutdown();
        engine.run().await.unwrap();
    }

    #[test]
    fn test_engine_shutdown_without_plugins() {
        let mut engine = CoreEngine::new(Config::default()).unwrap();
        tokio_test::block_on(engine.shutdown()).unwrap();
        assert!(engine.plugin_registry().list_plugins().is_empty());
    }
}
