//! Editor session: the state machine tying the file tree, validation and preview together

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use atelier_core::config::EditorConfig;
use atelier_core::diagnostic::{has_blocking, tally, Diagnostic};
use atelier_core::event::{EventBus, SystemEvent, TreeChange};
use atelier_core::flat::FlatFileMap;
use atelier_core::storage::{load_tree, KeyValueStore};
use atelier_core::tree::{FileEntry, FileNode, FileTree, NodeId, NodeKind, TreeError};
use atelier_core::Result;
use atelier_preview::{PreviewAssembler, PreviewHandle, PreviewStore};
use atelier_validator::HtmlValidator;

use crate::export::{build_archive, ARCHIVE_FILE_NAME};
use crate::persister::{PersistStatus, TreePersister};
use crate::EditorError;

/// Message of the synthetic diagnostic raised when a non-HTML file is run
pub const NOT_HTML_MESSAGE: &str = "run is only available for HTML files";

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No file selected
    Idle,
    Editing,
    Validating,
    /// The last run produced error diagnostics
    Blocked,
    /// The last run produced a preview
    Previewing,
}

/// Result of [`EditorSession::run`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Blocked {
        diagnostics: Vec<Diagnostic>,
    },
    Previewing {
        preview: PreviewHandle,
        diagnostics: Vec<Diagnostic>,
    },
}

impl RunOutcome {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            RunOutcome::Blocked { diagnostics } | RunOutcome::Previewing { diagnostics, .. } => {
                diagnostics
            }
        }
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        match self {
            RunOutcome::Previewing { preview, .. } => Some(preview),
            RunOutcome::Blocked { .. } => None,
        }
    }
}

/// A 0-based position in the active file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EditorPosition {
    pub line: usize,
    pub column: usize,
    /// Character offset from the start of the content
    pub offset: usize,
}

/// A transient highlight of the line a diagnostic points at
#[derive(Debug, Clone, Serialize)]
pub struct LineHighlight {
    pub file: String,
    pub position: EditorPosition,
    pub duration_ms: u64,
    #[serde(skip)]
    expires_at: Instant,
}

impl LineHighlight {
    pub fn is_active(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Serializable view of the session for clients
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub active_id: Option<NodeId>,
    pub active_path: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub preview: Option<PreviewHandle>,
    pub persistence: PersistStatus,
}

/// One editing session over one file tree
pub struct EditorSession {
    tree: FileTree,
    active: Option<NodeId>,
    diagnostics: Vec<Diagnostic>,
    state: SessionState,
    preview: Option<PreviewHandle>,
    highlight: Option<LineHighlight>,
    config: EditorConfig,
    validator: HtmlValidator,
    assembler: PreviewAssembler,
    previews: PreviewStore,
    persister: TreePersister,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl EditorSession {
    /// Open a session over the tree persisted in `store`.
    ///
    /// The first open against an empty store writes the scaffold project.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        config: EditorConfig,
        previews: PreviewStore,
        event_bus: Option<Arc<dyn EventBus>>,
    ) -> Result<Self> {
        let loaded = load_tree(store.as_ref()).await?;
        let persister = TreePersister::spawn(store, event_bus.clone());

        let tree = match loaded {
            Some(tree) => {
                tracing::info!("Loaded file tree with {} files", tree.files().len());
                tree
            }
            None => {
                tracing::info!("No stored file tree, writing the scaffold project");
                let tree = FileTree::scaffold();
                persister.save(tree.clone());
                tree
            }
        };

        Ok(Self {
            tree,
            active: None,
            diagnostics: Vec::new(),
            state: SessionState::Idle,
            preview: None,
            highlight: None,
            config,
            validator: HtmlValidator::new(),
            assembler: PreviewAssembler::new(),
            previews,
            persister,
            event_bus,
        })
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    pub fn files(&self) -> FlatFileMap {
        self.tree.flatten()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        self.preview.as_ref()
    }

    pub fn previews(&self) -> &PreviewStore {
        &self.previews
    }

    pub fn active_id(&self) -> Option<NodeId> {
        self.active
    }

    /// The active file with its path, always read from the tree
    pub fn active_file(&self) -> Option<(String, &FileEntry)> {
        let id = self.active?;
        let file = self.tree.find_file(id)?;
        Some((self.tree.path_of(id)?, file))
    }

    /// The current highlight, if it has not faded yet
    pub fn active_highlight(&self) -> Option<&LineHighlight> {
        self.highlight.as_ref().filter(|highlight| highlight.is_active())
    }

    pub fn persist_status(&self) -> PersistStatus {
        self.persister.status()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            active_id: self.active,
            active_path: self.active_file().map(|(path, _)| path),
            diagnostics: self.diagnostics.clone(),
            preview: self.preview.clone(),
            persistence: self.persister.status(),
        }
    }

    /// Create an empty file or folder under `parent_path`.
    ///
    /// Returns `None` when the parent path does not resolve to a folder.
    pub async fn create_node<S: AsRef<str>>(
        &mut self,
        kind: NodeKind,
        parent_path: &[S],
        name: &str,
    ) -> Result<Option<NodeId>> {
        let (tree, id) = self.tree.create(kind, parent_path, name)?;
        let Some(id) = id else {
            return Ok(None);
        };

        self.commit(tree);
        let path = self.tree.path_of(id).unwrap_or_else(|| name.to_string());
        tracing::debug!("Created {:?} {}", kind, path);
        self.emit(SystemEvent::tree_changed(TreeChange::Created, path))
            .await;
        Ok(Some(id))
    }

    pub async fn rename_node(&mut self, id: NodeId, new_name: &str) -> Result<()> {
        let tree = self.tree.rename(id, new_name)?;
        self.commit(tree);

        let path = self.tree.path_of(id).unwrap_or_else(|| new_name.to_string());
        self.emit(SystemEvent::tree_changed(TreeChange::Renamed, path))
            .await;
        Ok(())
    }

    /// Delete one node and its subtree
    pub async fn delete_node(&mut self, id: NodeId) -> Result<()> {
        let path = self
            .tree
            .path_of(id)
            .ok_or(TreeError::NodeNotFound(id))?;
        let tree = self.tree.delete(id)?;
        self.commit(tree);
        self.forget_missing_active();

        self.emit(SystemEvent::tree_changed(TreeChange::Deleted, path))
            .await;
        Ok(())
    }

    /// Delete the node at a slash-joined path
    pub async fn delete_path(&mut self, path: &str) -> Result<()> {
        let id = self
            .tree
            .find_path(path)
            .map(FileNode::id)
            .ok_or_else(|| TreeError::PathNotFound(path.to_string()))?;
        self.delete_node(id).await
    }

    /// Legacy global delete: every node named `name`, at any depth
    pub async fn delete_by_name(&mut self, name: &str) -> Result<()> {
        if !self.config.legacy_delete_by_name {
            return Err(EditorError::LegacyDeleteDisabled.into());
        }

        let tree = self.tree.delete_by_name(name);
        self.commit(tree);
        self.forget_missing_active();

        self.emit(SystemEvent::tree_changed(TreeChange::Deleted, name))
            .await;
        Ok(())
    }

    /// Make the file `id` the active one; diagnostics are kept
    pub fn select(&mut self, id: NodeId) -> Result<()> {
        match self.tree.find(id) {
            Some(FileNode::File(_)) => {
                self.active = Some(id);
                self.state = SessionState::Editing;
                Ok(())
            }
            Some(FileNode::Folder(_)) => Err(EditorError::NotAFile(id).into()),
            None => Err(TreeError::NodeNotFound(id).into()),
        }
    }

    /// Replace the content of the active file
    pub async fn edit(&mut self, content: &str) -> Result<()> {
        let id = self.active.ok_or(EditorError::NoActiveFile)?;
        let tree = self.tree.update_content(id, content)?;
        self.commit(tree);

        self.state = SessionState::Editing;
        if self.config.clear_diagnostics_on_edit {
            self.diagnostics.clear();
            self.highlight = None;
        }

        if let Some(path) = self.tree.path_of(id) {
            self.emit(SystemEvent::tree_changed(TreeChange::ContentUpdated, path))
                .await;
        }
        Ok(())
    }

    /// Validate the active file and, when nothing blocks, publish a preview
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let (path, file) = self.active_file().ok_or(EditorError::NoActiveFile)?;
        let (name, content) = (file.name.clone(), file.content.clone());

        self.diagnostics.clear();
        self.highlight = None;
        self.preview = None;

        if !self.config.is_html_file(&name) {
            tracing::debug!("Refusing to run non-HTML file {}", path);
            self.diagnostics = vec![Diagnostic::error(path, 1, 1, NOT_HTML_MESSAGE)];
            self.state = SessionState::Blocked;
            return Ok(RunOutcome::Blocked {
                diagnostics: self.diagnostics.clone(),
            });
        }

        self.state = SessionState::Validating;
        let files = self.tree.flatten();
        let diagnostics = self.validator.validate(&content, &path, &files);
        let (errors, warnings) = tally(&diagnostics);
        self.diagnostics = diagnostics;
        self.emit(SystemEvent::validation_completed(&path, errors, warnings))
            .await;

        if has_blocking(&self.diagnostics) {
            tracing::info!("Run of {} blocked by {} errors", path, errors);
            self.state = SessionState::Blocked;
            return Ok(RunOutcome::Blocked {
                diagnostics: self.diagnostics.clone(),
            });
        }

        let document = self.assembler.assemble(&files, &path)?;
        let handle = self.previews.publish(document);
        self.emit(SystemEvent::preview_published(
            handle.id,
            handle.content_hash.clone(),
        ))
        .await;

        tracing::info!("Previewing {} at {}", path, handle.url);
        self.preview = Some(handle.clone());
        self.state = SessionState::Previewing;

        Ok(RunOutcome::Previewing {
            preview: handle,
            diagnostics: self.diagnostics.clone(),
        })
    }

    /// Move to the position of diagnostic `index` and highlight its line.
    ///
    /// When the diagnostic belongs to another file that file becomes active.
    pub fn navigate_to(&mut self, index: usize) -> Result<LineHighlight> {
        let diagnostic = self
            .diagnostics
            .get(index)
            .cloned()
            .ok_or(EditorError::DiagnosticNotFound(index))?;

        if let Some(id) = self
            .tree
            .find_path(&diagnostic.file)
            .and_then(FileNode::as_file)
            .map(|file| file.id)
        {
            if self.active != Some(id) {
                self.active = Some(id);
                self.state = SessionState::Editing;
            }
        }

        let (path, file) = self.active_file().ok_or(EditorError::NoActiveFile)?;
        let position = locate(&file.content, diagnostic.line, diagnostic.column);
        let duration = Duration::from_millis(self.config.highlight_duration_ms);

        let highlight = LineHighlight {
            file: path,
            position,
            duration_ms: self.config.highlight_duration_ms,
            expires_at: Instant::now() + duration,
        };
        self.highlight = Some(highlight.clone());
        Ok(highlight)
    }

    /// Zip the whole project in memory
    pub async fn export_archive(&self) -> Result<Vec<u8>> {
        let (bytes, entries) = build_archive(&self.tree)?;
        self.emit(SystemEvent::export_completed(entries, bytes.len()))
            .await;
        Ok(bytes)
    }

    /// Write `project.zip` into `dir`, returning its path
    pub async fn export_to(&self, dir: &Path) -> Result<PathBuf> {
        let bytes = self.export_archive().await?;
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(ARCHIVE_FILE_NAME);
        tokio::fs::write(&path, bytes).await?;
        tracing::info!("Exported project to {}", path.display());
        Ok(path)
    }

    /// Wait for queued snapshots to reach storage
    pub async fn flush(&self) -> Result<()> {
        self.persister.flush().await
    }

    fn commit(&mut self, tree: FileTree) {
        self.tree = tree;
        self.persister.save(self.tree.clone());
    }

    fn forget_missing_active(&mut self) {
        if let Some(id) = self.active {
            if self.tree.find(id).is_none() {
                self.active = None;
                self.diagnostics.clear();
                self.highlight = None;
                self.state = SessionState::Idle;
            }
        }
    }

    async fn emit(&self, event: SystemEvent) {
        if let Some(event_bus) = &self.event_bus {
            if let Err(e) = event_bus.publish_system_event(event).await {
                tracing::warn!("Failed to publish editor event: {}", e);
            }
        }
    }
}

/// Map a 1-based line/column to a 0-based, clamped position in `content`
fn locate(content: &str, line: usize, column: usize) -> EditorPosition {
    let lines: Vec<&str> = content.split('\n').collect();
    let line = line.saturating_sub(1).min(lines.len() - 1);
    let width = lines[line].chars().count();
    let column = column.saturating_sub(1).min(width);

    let offset = lines[..line]
        .iter()
        .map(|text| text.chars().count() + 1)
        .sum::<usize>()
        + column;

    EditorPosition {
        line,
        column,
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::diagnostic::Severity;
    use atelier_core::event::{InMemoryEventBus, RecordingHandler};
    use atelier_core::storage::{MemoryStore, TREE_STORAGE_KEY};
    use std::io::Cursor;

    fn previews() -> PreviewStore {
        PreviewStore::new(Duration::from_secs(60), 8)
    }

    async fn open_with(config: EditorConfig) -> (EditorSession, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let session = EditorSession::open(store.clone(), config, previews(), None)
            .await
            .unwrap();
        (session, store)
    }

    fn id_of(session: &EditorSession, path: &str) -> NodeId {
        session.tree().find_path(path).unwrap().id()
    }

    #[tokio::test]
    async fn test_first_open_persists_scaffold() {
        let (session, store) = open_with(EditorConfig::default()).await;
        session.flush().await.unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(store.get(TREE_STORAGE_KEY).await.unwrap().is_some());

        let reopened = EditorSession::open(store, EditorConfig::default(), previews(), None)
            .await
            .unwrap();
        assert_eq!(reopened.tree(), &FileTree::scaffold());
    }

    #[tokio::test]
    async fn test_run_scaffold_previews() {
        let (mut session, _) = open_with(EditorConfig::default()).await;
        session.select(id_of(&session, "index.html")).unwrap();

        let outcome = session.run().await.unwrap();
        let preview = outcome.preview().unwrap().clone();

        assert_eq!(session.state(), SessionState::Previewing);
        assert!(outcome.diagnostics().is_empty());
        assert!(session.previews().get(preview.id).is_some());
    }

    #[tokio::test]
    async fn test_error_and_warning_blocks() {
        let (mut session, _) = open_with(EditorConfig::default()).await;
        session.select(id_of(&session, "index.html")).unwrap();
        session
            .edit("<div class=box>\n<img src=\"missing.png\">\n</div>")
            .await
            .unwrap();

        let outcome = session.run().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Blocked { .. }));
        assert_eq!(session.state(), SessionState::Blocked);
        assert!(session.preview().is_none());
        assert_eq!(session.diagnostics().len(), 2);
    }

    #[tokio::test]
    async fn test_warning_only_previews() {
        let (mut session, _) = open_with(EditorConfig::default()).await;
        session.select(id_of(&session, "index.html")).unwrap();
        session
            .edit("<div class=\"box\">\n<img src=\"missing.png\">\n</div>")
            .await
            .unwrap();

        let outcome = session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Previewing);
        assert_eq!(outcome.diagnostics().len(), 1);
        assert_eq!(outcome.diagnostics()[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_non_html_run_is_a_usage_error() {
        let (mut session, _) = open_with(EditorConfig::default()).await;
        session.select(id_of(&session, "src/style.css")).unwrap();

        let outcome = session.run().await.unwrap();
        let diagnostics = outcome.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, NOT_HTML_MESSAGE);
        assert_eq!((diagnostics[0].line, diagnostics[0].column), (1, 1));
        assert_eq!(session.state(), SessionState::Blocked);
    }

    #[tokio::test]
    async fn test_run_without_selection() {
        let (mut session, _) = open_with(EditorConfig::default()).await;
        assert!(session.run().await.is_err());

        let src = id_of(&session, "src");
        assert!(session.select(src).is_err());
    }

    #[tokio::test]
    async fn test_diagnostics_survive_edit_by_default() {
        let (mut session, _) = open_with(EditorConfig::default()).await;
        session.select(id_of(&session, "index.html")).unwrap();
        session.edit("<p>open").await.unwrap();
        session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Blocked);

        session.edit("<p>open</p>").await.unwrap();
        assert_eq!(session.state(), SessionState::Editing);
        assert_eq!(session.diagnostics().len(), 1);

        let config = EditorConfig {
            clear_diagnostics_on_edit: true,
            ..EditorConfig::default()
        };
        let (mut clearing, _) = open_with(config).await;
        clearing.select(id_of(&clearing, "index.html")).unwrap();
        clearing.edit("<p>open").await.unwrap();
        clearing.run().await.unwrap();
        clearing.edit("<p>open</p>").await.unwrap();
        assert!(clearing.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn test_navigate_to_diagnostic() {
        let (mut session, _) = open_with(EditorConfig::default()).await;
        session.select(id_of(&session, "index.html")).unwrap();
        session
            .edit("<html>\n<body>\n  <img src=x.png>\n</body>\n</html>")
            .await
            .unwrap();
        session.run().await.unwrap();

        let highlight = session.navigate_to(0).unwrap();
        assert_eq!(highlight.file, "index.html");
        assert_eq!(highlight.position.line, 2);
        assert_eq!(highlight.position.column, 7);
        assert_eq!(highlight.position.offset, 7 + 7 + 7);
        assert_eq!(highlight.duration_ms, 2000);
        assert!(session.active_highlight().is_some());

        assert!(session.navigate_to(5).is_err());
    }

    #[tokio::test]
    async fn test_navigating_to_another_file_starts_editing() {
        let (mut session, _) = open_with(EditorConfig::default()).await;
        let script = id_of(&session, "src/script.js");
        session.select(script).unwrap();
        session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Blocked);

        // the diagnostic's path now names a different file
        session.rename_node(script, "old.js").await.unwrap();
        let replacement = session
            .create_node(NodeKind::File, &["src"], "script.js")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state(), SessionState::Blocked);

        let highlight = session.navigate_to(0).unwrap();
        assert_eq!(highlight.file, "src/script.js");
        assert_eq!(session.active_id(), Some(replacement));
        assert_eq!(session.state(), SessionState::Editing);
    }

    #[tokio::test]
    async fn test_highlight_fades() {
        let config = EditorConfig {
            highlight_duration_ms: 10,
            ..EditorConfig::default()
        };
        let (mut session, _) = open_with(config).await;
        session.select(id_of(&session, "src/script.js")).unwrap();
        session.run().await.unwrap();
        session.navigate_to(0).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.active_highlight().is_none());
    }

    #[tokio::test]
    async fn test_tree_operations_track_active_file() {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let recorder = Arc::new(RecordingHandler::new());
        bus.subscribe_system_events(recorder.clone()).await.unwrap();

        let store = Arc::new(MemoryStore::new());
        let mut session =
            EditorSession::open(store, EditorConfig::default(), previews(), Some(bus))
                .await
                .unwrap();

        let page = session
            .create_node(NodeKind::File, &["src"], "page.html")
            .await
            .unwrap()
            .unwrap();
        assert!(session
            .create_node(NodeKind::File, &["missing"], "x.html")
            .await
            .unwrap()
            .is_none());

        session.select(page).unwrap();
        session.rename_node(page, "about.html").await.unwrap();
        assert_eq!(session.active_file().unwrap().0, "src/about.html");

        session.delete_path("src").await.unwrap();
        assert!(session.active_id().is_none());
        assert_eq!(session.state(), SessionState::Idle);

        let changes: Vec<_> = recorder
            .events()
            .await
            .iter()
            .map(|event| event.event_type())
            .collect();
        assert_eq!(changes, vec!["tree_changed"; 3]);
    }

    #[tokio::test]
    async fn test_legacy_delete_is_gated() {
        let (mut session, _) = open_with(EditorConfig::default()).await;
        assert!(session.delete_by_name("style.css").await.is_err());

        let config = EditorConfig {
            legacy_delete_by_name: true,
            ..EditorConfig::default()
        };
        let (mut legacy, _) = open_with(config).await;
        legacy
            .create_node(NodeKind::File, &[] as &[&str], "style.css")
            .await
            .unwrap();
        legacy.delete_by_name("style.css").await.unwrap();
        assert!(legacy.files().paths().all(|path| !path.ends_with("style.css")));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_memory_state() {
        let store = Arc::new(MemoryStore::with_quota(10_000));
        let mut session = EditorSession::open(store, EditorConfig::default(), previews(), None)
            .await
            .unwrap();
        session.flush().await.unwrap();

        session.select(id_of(&session, "index.html")).unwrap();
        let big = "x".repeat(20_000);
        session.edit(&big).await.unwrap();

        assert!(session.flush().await.is_err());
        assert!(matches!(session.persist_status(), PersistStatus::Failed { .. }));
        assert_eq!(session.active_file().unwrap().1.content, big);
    }

    #[tokio::test]
    async fn test_export_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _) = open_with(EditorConfig::default()).await;

        let path = session.export_to(dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap(), ARCHIVE_FILE_NAME);

        let bytes = std::fs::read(path).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
    }

    #[test]
    fn test_locate_clamps() {
        assert_eq!(
            locate("ab\ncd", 9, 9),
            EditorPosition {
                line: 1,
                column: 2,
                offset: 5
            }
        );
        assert_eq!(
            locate("", 1, 1),
            EditorPosition {
                line: 0,
                column: 0,
                offset: 0
            }
        );
    }
}
