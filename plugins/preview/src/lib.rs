//! Preview plugin for Atelier
//!
//! Assembles runnable documents from the virtual file tree and hosts them for a
//! short time so a client can load them in an isolated frame.

pub mod assembler;
pub mod store;

pub use assembler::{PreviewAssembler, PreviewDocument};
pub use store::{PreviewHandle, PreviewStore};

use async_trait::async_trait;
use atelier_core::{AtelierError, Plugin, PluginContext, PluginStatus, Result};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared resource key under which the plugin publishes its [`PreviewStore`]
pub const PREVIEW_STORE_RESOURCE: &str = "preview_store";

/// Preview assembly errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreviewError {
    #[error("Entry file not found: {0}")]
    EntryNotFound(String),
}

impl From<PreviewError> for AtelierError {
    fn from(err: PreviewError) -> Self {
        AtelierError::Preview(err.to_string())
    }
}

/// Plugin owning the process-wide preview store
pub struct PreviewPlugin {
    name: String,
    version: String,
    status: PluginStatus,
    store: Option<PreviewStore>,
}

impl PreviewPlugin {
    pub fn new() -> Self {
        Self {
            name: "preview".to_string(),
            version: "0.1.0".to_string(),
            status: PluginStatus::Loading,
            store: None,
        }
    }

    /// The store, once the plugin is initialized
    pub fn store(&self) -> Option<&PreviewStore> {
        self.store.as_ref()
    }
}

impl Default for PreviewPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for PreviewPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn initialize(&mut self, context: &PluginContext) -> Result<()> {
        tracing::info!("Initializing preview plugin");

        let editor = &context.config.editor;
        let store = PreviewStore::new(
            Duration::from_millis(editor.preview_ttl_ms),
            editor.max_live_previews,
        )
        .with_event_bus(context.event_bus.clone());

        context
            .set_shared_resource(PREVIEW_STORE_RESOURCE, Arc::new(store.clone()))
            .await;
        self.store = Some(store);
        self.status = PluginStatus::Active;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down preview plugin");
        self.store = None;
        self.status = PluginStatus::Disabled;
        Ok(())
    }

    fn status(&self) -> PluginStatus {
        self.status.clone()
    }

    fn provided_services(&self) -> Vec<&str> {
        vec!["preview-assembly", "preview-hosting"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{Config, InMemoryEventBus};

    #[tokio::test]
    async fn test_plugin_shares_store() {
        let mut config = Config::default();
        config.editor.preview_ttl_ms = 250;
        let context = PluginContext::new(Arc::new(InMemoryEventBus::new()), Arc::new(config));

        let mut plugin = PreviewPlugin::new();
        plugin.initialize(&context).await.unwrap();
        assert_eq!(plugin.status(), PluginStatus::Active);

        let shared = context
            .get_shared_resource::<PreviewStore>(PREVIEW_STORE_RESOURCE)
            .await
            .unwrap();
        assert_eq!(shared.ttl(), Duration::from_millis(250));

        // both handles address the same entries
        let handle = shared.publish(PreviewDocument {
            html: String::new(),
            content_hash: String::new(),
            css_sources: Vec::new(),
            script_sources: Vec::new(),
        });
        assert!(plugin.store().unwrap().get(handle.id).is_some());
    }

    #[test]
    fn test_error_conversion() {
        let err: AtelierError = PreviewError::EntryNotFound("index.html".to_string()).into();
        assert!(matches!(err, AtelierError::Preview(message) if message.contains("index.html")));
    }
}
