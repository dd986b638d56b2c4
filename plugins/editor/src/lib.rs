//! Editor plugin for Atelier
//!
//! Owns the single [`EditorSession`] of the process: the persisted file tree,
//! the active file, its diagnostics and the preview it last produced. Other
//! plugins reach the session and the photo album through shared resources.

use async_trait::async_trait;
use atelier_core::{
    event::{SystemEvent, SystemEventHandler},
    tree::NodeId,
    Album, AtelierError, JsonFileStore, KeyValueStore, Plugin, PluginContext, PluginStatus,
    Result,
};
use atelier_preview::{PreviewStore, PREVIEW_STORE_RESOURCE};
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod export;
pub mod persister;
pub mod session;

pub use export::{build_archive, ARCHIVE_FILE_NAME};
pub use persister::{PersistCommand, PersistStatus, TreePersister};
pub use session::{
    EditorPosition, EditorSession, LineHighlight, RunOutcome, SessionSnapshot, SessionState,
    NOT_HTML_MESSAGE,
};

/// Shared resource key of the `Mutex<EditorSession>`
pub const EDITOR_SESSION_RESOURCE: &str = "editor_session";

/// Shared resource key of the [`Album`]
pub const ALBUM_RESOURCE: &str = "album";

/// Editor-specific errors
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("No file is selected")]
    NoActiveFile,

    #[error("Node {0} is a folder, not a file")]
    NotAFile(NodeId),

    #[error("No diagnostic at index {0}")]
    DiagnosticNotFound(usize),

    #[error("Deleting by name is disabled; delete by path or id instead")]
    LegacyDeleteDisabled,

    #[error("Archive creation failed: {0}")]
    Archive(String),
}

impl From<EditorError> for AtelierError {
    fn from(err: EditorError) -> Self {
        match err {
            EditorError::Archive(message) => AtelierError::Export(message),
            other => AtelierError::InvalidInput(other.to_string()),
        }
    }
}

/// Plugin that opens the editor session against persistent storage
pub struct EditorPlugin {
    name: String,
    version: String,
    status: PluginStatus,
    store: Option<Arc<dyn KeyValueStore>>,
    session: Option<Arc<Mutex<EditorSession>>>,
}

impl EditorPlugin {
    pub fn new() -> Self {
        Self {
            name: "editor".to_string(),
            version: "0.1.0".to_string(),
            status: PluginStatus::Loading,
            store: None,
            session: None,
        }
    }

    /// Use `store` instead of the JSON file named by the storage config
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The session, once the plugin is initialized
    pub fn session(&self) -> Option<Arc<Mutex<EditorSession>>> {
        self.session.clone()
    }
}

impl Default for EditorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for EditorPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dependencies(&self) -> Vec<&str> {
        vec!["preview"]
    }

    async fn initialize(&mut self, context: &PluginContext) -> Result<()> {
        tracing::info!("Initializing editor plugin");

        let previews = context
            .get_shared_resource::<PreviewStore>(PREVIEW_STORE_RESOURCE)
            .await
            .ok_or_else(|| AtelierError::plugin("Preview store not found in shared resources"))?;

        let store: Arc<dyn KeyValueStore> = match &self.store {
            Some(store) => store.clone(),
            None => {
                let path = &context.config.storage.path;
                tracing::info!("Using storage file {}", path.display());
                Arc::new(JsonFileStore::new(path.clone()))
            }
        };

        let session = EditorSession::open(
            store.clone(),
            context.config.editor.clone(),
            previews.as_ref().clone(),
            Some(context.event_bus.clone()),
        )
        .await?;
        let session = Arc::new(Mutex::new(session));

        context
            .set_shared_resource(EDITOR_SESSION_RESOURCE, session.clone())
            .await;
        context
            .set_shared_resource(ALBUM_RESOURCE, Arc::new(Album::new(store.clone())))
            .await;
        context
            .event_bus
            .subscribe_system_events(Arc::new(EditorEventHandler))
            .await?;

        self.store = Some(store);
        self.session = Some(session);
        self.status = PluginStatus::Active;
        tracing::info!("Editor plugin initialized");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down editor plugin");

        if let Some(session) = self.session.take() {
            if let Err(e) = session.lock().await.flush().await {
                tracing::error!("Final save of the file tree failed: {}", e);
            }
        }

        self.status = PluginStatus::Disabled;
        Ok(())
    }

    fn status(&self) -> PluginStatus {
        self.status.clone()
    }

    fn provided_services(&self) -> Vec<&str> {
        vec!["file-tree", "validation", "run", "export", "album"]
    }
}

/// Surfaces background failures and preview expiry in the log
pub struct EditorEventHandler;

#[async_trait]
impl SystemEventHandler for EditorEventHandler {
    async fn handle_system_event(&self, event: &SystemEvent) -> Result<()> {
        match event {
            SystemEvent::PersistenceFailed { message, .. } => {
                tracing::warn!("Changes are only kept in memory: {}", message);
            }
            SystemEvent::PreviewRevoked { preview_id, .. } => {
                tracing::trace!("Preview {} is no longer reachable", preview_id);
            }
            _ => {}
        }
        Ok(())
    }

    fn handler_name(&self) -> &str {
        "editor-event-handler"
    }
}
