//! Event system for decoupled communication between components

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ErrorSeverity, Result};

/// Event bus for publishing and subscribing to system events
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a system event to all subscribers
    async fn publish_system_event(&self, event: SystemEvent) -> Result<()>;

    /// Subscribe to system events
    async fn subscribe_system_events(
        &self,
        handler: Arc<dyn SystemEventHandler>,
    ) -> Result<SubscriptionId>;

    /// Unsubscribe from events
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Get the number of active subscriptions
    async fn subscription_count(&self) -> usize;
}

/// Handler for system events
#[async_trait]
pub trait SystemEventHandler: Send + Sync {
    /// Handle a system event
    async fn handle_system_event(&self, event: &SystemEvent) -> Result<()>;

    /// Get handler name for debugging
    fn handler_name(&self) -> &str {
        "UnnamedSystemEventHandler"
    }
}

/// Unique identifier for event subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Kind of structural or content change applied to the file tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeChange {
    Created,
    Renamed,
    Deleted,
    ContentUpdated,
}

/// System events that can occur during operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemEvent {
    /// The file tree was mutated
    TreeChanged {
        change: TreeChange,
        path: String,
        timestamp: SystemTime,
    },
    /// A validation pass finished for one file
    ValidationCompleted {
        file: String,
        errors: usize,
        warnings: usize,
        timestamp: SystemTime,
    },
    /// An assembled preview became addressable
    PreviewPublished {
        preview_id: Uuid,
        content_hash: String,
        timestamp: SystemTime,
    },
    /// A preview reference was released
    PreviewRevoked {
        preview_id: Uuid,
        timestamp: SystemTime,
    },
    /// Writing the tree to storage failed; the in-memory tree is still current
    PersistenceFailed {
        message: String,
        timestamp: SystemTime,
    },
    /// A project archive was produced
    ExportCompleted {
        entries: usize,
        bytes: usize,
        timestamp: SystemTime,
    },
    /// Plugin was loaded
    PluginLoaded {
        plugin_name: String,
        version: String,
        timestamp: SystemTime,
    },
    /// System error occurred
    Error {
        source: String,
        message: String,
        severity: ErrorSeverity,
        timestamp: SystemTime,
    },
}

impl SystemEvent {
    pub fn tree_changed(change: TreeChange, path: impl Into<String>) -> Self {
        Self::TreeChanged {
            change,
            path: path.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn validation_completed(file: impl Into<String>, errors: usize, warnings: usize) -> Self {
        Self::ValidationCompleted {
            file: file.into(),
            errors,
            warnings,
            timestamp: SystemTime::now(),
        }
    }

    pub fn preview_published(preview_id: Uuid, content_hash: String) -> Self {
        Self::PreviewPublished {
            preview_id,
            content_hash,
            timestamp: SystemTime::now(),
        }
    }

    pub fn preview_revoked(preview_id: Uuid) -> Self {
        Self::PreviewRevoked {
            preview_id,
            timestamp: SystemTime::now(),
        }
    }

    pub fn persistence_failed(message: impl Into<String>) -> Self {
        Self::PersistenceFailed {
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn export_completed(entries: usize, bytes: usize) -> Self {
        Self::ExportCompleted {
            entries,
            bytes,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a new plugin loaded event with current timestamp
    pub fn plugin_loaded(plugin_name: String, version: String) -> Self {
        Self::PluginLoaded {
            plugin_name,
            version,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a new error event with current timestamp
    pub fn error(source: String, message: String, severity: ErrorSeverity) -> Self {
        Self::Error {
            source,
            message,
            severity,
            timestamp: SystemTime::now(),
        }
    }

    /// Short machine-readable event name
    pub fn event_type(&self) -> &'static str {
        match self {
            SystemEvent::TreeChanged { .. } => "tree_changed",
            SystemEvent::ValidationCompleted { .. } => "validation_completed",
            SystemEvent::PreviewPublished { .. } => "preview_published",
            SystemEvent::PreviewRevoked { .. } => "preview_revoked",
            SystemEvent::PersistenceFailed { .. } => "persistence_failed",
            SystemEvent::ExportCompleted { .. } => "export_completed",
            SystemEvent::PluginLoaded { .. } => "plugin_loaded",
            SystemEvent::Error { .. } => "error",
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        match self {
            SystemEvent::TreeChanged { timestamp, .. }
            | SystemEvent::ValidationCompleted { timestamp, .. }
            | SystemEvent::PreviewPublished { timestamp, .. }
            | SystemEvent::PreviewRevoked { timestamp, .. }
            | SystemEvent::PersistenceFailed { timestamp, .. }
            | SystemEvent::ExportCompleted { timestamp, .. }
            | SystemEvent::PluginLoaded { timestamp, .. }
            | SystemEvent::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SystemEvent::TreeChanged { change, path, .. } => {
                format!("Tree node {} was {:?}", path, change)
            }
            SystemEvent::ValidationCompleted {
                file,
                errors,
                warnings,
                ..
            } => {
                format!(
                    "Validated {}: {} errors, {} warnings",
                    file, errors, warnings
                )
            }
            SystemEvent::PreviewPublished {
                preview_id,
                content_hash,
                ..
            } => {
                format!("Preview {} published ({})", preview_id, content_hash)
            }
            SystemEvent::PreviewRevoked { preview_id, .. } => {
                format!("Preview {} revoked", preview_id)
            }
            SystemEvent::PersistenceFailed { message, .. } => {
                format!("Failed to persist tree: {}", message)
            }
            SystemEvent::ExportCompleted { entries, bytes, .. } => {
                format!("Exported {} files ({} bytes)", entries, bytes)
            }
            SystemEvent::PluginLoaded {
                plugin_name,
                version,
                ..
            } => {
                format!("Plugin {} v{} loaded", plugin_name, version)
            }
            SystemEvent::Error {
                source,
                message,
                severity,
                ..
            } => {
                format!("{:?} error from {}: {}", severity, source, message)
            }
        }
    }

    /// Key/value view used in structured logs
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();

        match self {
            SystemEvent::TreeChanged { change, path, .. } => {
                metadata.insert("change".to_string(), format!("{:?}", change));
                metadata.insert("path".to_string(), path.clone());
            }
            SystemEvent::ValidationCompleted {
                file,
                errors,
                warnings,
                ..
            } => {
                metadata.insert("file".to_string(), file.clone());
                metadata.insert("errors".to_string(), errors.to_string());
                metadata.insert("warnings".to_string(), warnings.to_string());
            }
            SystemEvent::PreviewPublished {
                preview_id,
                content_hash,
                ..
            } => {
                metadata.insert("preview_id".to_string(), preview_id.to_string());
                metadata.insert("content_hash".to_string(), content_hash.clone());
            }
            SystemEvent::PreviewRevoked { preview_id, .. } => {
                metadata.insert("preview_id".to_string(), preview_id.to_string());
            }
            SystemEvent::PersistenceFailed { message, .. } => {
                metadata.insert("message".to_string(), message.clone());
            }
            SystemEvent::ExportCompleted { entries, bytes, .. } => {
                metadata.insert("entries".to_string(), entries.to_string());
                metadata.insert("bytes".to_string(), bytes.to_string());
            }
            SystemEvent::PluginLoaded {
                plugin_name,
                version,
                ..
            } => {
                metadata.insert("plugin_name".to_string(), plugin_name.clone());
                metadata.insert("version".to_string(), version.clone());
            }
            SystemEvent::Error {
                source,
                message,
                severity,
                ..
            } => {
                metadata.insert("source".to_string(), source.clone());
                metadata.insert("message".to_string(), message.clone());
                metadata.insert("severity".to_string(), format!("{:?}", severity));
            }
        }

        metadata
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SystemEvent::Error { .. } | SystemEvent::PersistenceFailed { .. }
        )
    }

    /// Check if this is a preview lifecycle event
    pub fn is_preview_event(&self) -> bool {
        matches!(
            self,
            SystemEvent::PreviewPublished { .. } | SystemEvent::PreviewRevoked { .. }
        )
    }
}

/// In-memory implementation of the event bus
pub struct InMemoryEventBus {
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<dyn SystemEventHandler>>>,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish_system_event(&self, event: SystemEvent) -> Result<()> {
        tracing::debug!("Publishing event: {}", event.event_type());

        // Snapshot handlers so a handler may subscribe or unsubscribe while running
        let handlers: Vec<Arc<dyn SystemEventHandler>> =
            self.subscriptions.read().await.values().cloned().collect();

        if handlers.is_empty() {
            tracing::trace!("No subscribers for event type: {}", event.event_type());
            return Ok(());
        }

        let mut handlers_called = 0;
        for handler in handlers {
            if let Err(e) = handler.handle_system_event(&event).await {
                tracing::error!(
                    "Handler {} failed to process event {}: {}",
                    handler.handler_name(),
                    event.event_type(),
                    e
                );
            } else {
                handlers_called += 1;
            }
        }

        tracing::debug!(
            "Routed event {} to {} handlers",
            event.event_type(),
            handlers_called
        );

        Ok(())
    }

    async fn subscribe_system_events(
        &self,
        handler: Arc<dyn SystemEventHandler>,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId::new();
        tracing::debug!(
            "Created subscription {:?} for handler {}",
            id,
            handler.handler_name()
        );
        self.subscriptions.write().await.insert(id, handler);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if self.subscriptions.write().await.remove(&id).is_some() {
            tracing::debug!("Removed subscription: {:?}", id);
        } else {
            tracing::warn!("Attempted to remove non-existent subscription: {:?}", id);
        }
        Ok(())
    }

    async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

/// Handler that records every event it receives; handy in tests and diagnostics
#[derive(Default)]
pub struct RecordingHandler {
    events: RwLock<Vec<SystemEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far
    pub async fn events(&self) -> Vec<SystemEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl SystemEventHandler for RecordingHandler {
    async fn handle_system_event(&self, event: &SystemEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    fn handler_name(&self) -> &str {
        "RecordingHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AtelierError;

    struct FailingHandler;

    #[async_trait]
    impl SystemEventHandler for FailingHandler {
        async fn handle_system_event(&self, _event: &SystemEvent) -> Result<()> {
            Err(AtelierError::generic("handler failure"))
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = InMemoryEventBus::new();
        let first = Arc::new(RecordingHandler::new());
        let second = Arc::new(RecordingHandler::new());

        bus.subscribe_system_events(first.clone()).await.unwrap();
        let second_id = bus.subscribe_system_events(second.clone()).await.unwrap();
        bus.subscribe_system_events(Arc::new(FailingHandler))
            .await
            .unwrap();
        assert_eq!(bus.subscription_count().await, 3);

        // a failing handler does not stop delivery or fail the publish
        bus.publish_system_event(SystemEvent::tree_changed(TreeChange::Created, "src/app.js"))
            .await
            .unwrap();

        bus.unsubscribe(second_id).await.unwrap();
        bus.publish_system_event(SystemEvent::validation_completed("index.html", 1, 2))
            .await
            .unwrap();

        assert_eq!(first.events().await.len(), 2);
        assert_eq!(second.events().await.len(), 1);
        assert_eq!(bus.subscription_count().await, 2);
    }

    #[test]
    fn test_event_descriptions() {
        let event = SystemEvent::validation_completed("index.html", 2, 1);
        assert_eq!(event.event_type(), "validation_completed");
        assert_eq!(event.description(), "Validated index.html: 2 errors, 1 warnings");
        assert_eq!(event.metadata().get("errors").map(String::as_str), Some("2"));

        let failure = SystemEvent::persistence_failed("quota exceeded");
        assert!(failure.is_error());
        assert!(!failure.is_preview_event());
        assert!(SystemEvent::preview_revoked(Uuid::new_v4()).is_preview_event());
    }
}
