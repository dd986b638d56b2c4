//! Concrete handler implementations for the server plugin

use crate::{ApiServices, HandlerRegistry, HttpHandler, HttpRequest, HttpResponse};
use async_trait::async_trait;
use atelier_core::{
    forum::{ForumChannel, ForumMessage, ForumPost},
    tree::{FileNode, NodeId, NodeKind},
    Album, AtelierError, Result,
};
use atelier_editor::{EditorSession, ARCHIVE_FILE_NAME};
use atelier_preview::PreviewStore;
use axum::http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

type SharedSession = Arc<Mutex<EditorSession>>;

/// Register every API route against `services`
pub async fn register_api_handlers(registry: &HandlerRegistry, services: ApiServices) {
    let session = services.session;
    let handlers: Vec<Arc<dyn HttpHandler>> = vec![
        Arc::new(HealthHandler),
        Arc::new(TreeHandler::new(session.clone())),
        Arc::new(FilesHandler::new(session.clone())),
        Arc::new(CreateNodeHandler::new(session.clone())),
        Arc::new(RenameNodeHandler::new(session.clone())),
        Arc::new(DeleteNodeHandler::new(session.clone())),
        Arc::new(SelectHandler::new(session.clone())),
        Arc::new(EditHandler::new(session.clone())),
        Arc::new(RunHandler::new(session.clone())),
        Arc::new(NavigateHandler::new(session.clone())),
        Arc::new(ExportHandler::new(session)),
        Arc::new(PreviewHandler::new(services.previews)),
        Arc::new(ForumListHandler::new(services.forum.clone())),
        Arc::new(ForumPostHandler::new(services.forum)),
        Arc::new(AlbumListHandler::new(services.album.clone())),
        Arc::new(AlbumAddHandler::new(services.album.clone())),
        Arc::new(AlbumRemoveHandler::new(services.album)),
    ];

    for handler in handlers {
        registry.register_http_handler(handler).await;
    }
}

/// Nested view of a node including its id, which the stored form omits
fn node_json(node: &FileNode) -> serde_json::Value {
    match node {
        FileNode::File(file) => json!({
            "id": file.id,
            "name": file.name,
            "type": NodeKind::File,
        }),
        FileNode::Folder(folder) => json!({
            "id": folder.id,
            "name": folder.name,
            "type": NodeKind::Folder,
            "children": folder.children.iter().map(node_json).collect::<Vec<_>>(),
        }),
    }
}

/// Liveness probe
pub struct HealthHandler;

#[async_trait]
impl HttpHandler for HealthHandler {
    fn path_pattern(&self) -> &str {
        "/health"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    async fn handle(&self, _request: HttpRequest) -> Result<HttpResponse> {
        HttpResponse::json(&json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }
}

/// `GET /api/tree`: the nested tree with ids plus the session snapshot
pub struct TreeHandler {
    session: SharedSession,
}

impl TreeHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for TreeHandler {
    fn path_pattern(&self) -> &str {
        "/api/tree"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    async fn handle(&self, _request: HttpRequest) -> Result<HttpResponse> {
        let session = self.session.lock().await;
        let nodes: Vec<_> = session.tree().nodes().iter().map(node_json).collect();

        HttpResponse::json(&json!({
            "nodes": nodes,
            "session": session.snapshot(),
        }))
    }
}

/// `GET /api/files`: the flattened path-to-content map
pub struct FilesHandler {
    session: SharedSession,
}

impl FilesHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for FilesHandler {
    fn path_pattern(&self) -> &str {
        "/api/files"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    async fn handle(&self, _request: HttpRequest) -> Result<HttpResponse> {
        let files = self.session.lock().await.files();
        let entries: Vec<_> = files
            .iter()
            .map(|(path, content)| json!({ "path": path, "content": content }))
            .collect();

        HttpResponse::json(&json!({ "files": entries }))
    }
}

#[derive(Debug, Deserialize)]
struct CreateNodeBody {
    kind: NodeKind,
    #[serde(default)]
    parent: String,
    name: String,
}

/// `POST /api/nodes`: create an empty file or folder
pub struct CreateNodeHandler {
    session: SharedSession,
}

impl CreateNodeHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for CreateNodeHandler {
    fn path_pattern(&self) -> &str {
        "/api/nodes"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let body: CreateNodeBody = request.json()?;
        let parent: Vec<&str> = body.parent.split('/').filter(|s| !s.is_empty()).collect();

        let created = self
            .session
            .lock()
            .await
            .create_node(body.kind, &parent, &body.name)
            .await?;

        match created {
            Some(id) => Ok(HttpResponse::json(&json!({ "success": true, "id": id }))?
                .with_status(StatusCode::CREATED)),
            None => Ok(HttpResponse::error(
                StatusCode::NOT_FOUND,
                &format!("No folder at '{}'", body.parent),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RenameNodeBody {
    id: NodeId,
    name: String,
}

/// `POST /api/nodes/rename`
pub struct RenameNodeHandler {
    session: SharedSession,
}

impl RenameNodeHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for RenameNodeHandler {
    fn path_pattern(&self) -> &str {
        "/api/nodes/rename"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let body: RenameNodeBody = request.json()?;
        self.session
            .lock()
            .await
            .rename_node(body.id, &body.name)
            .await?;
        HttpResponse::json(&json!({ "success": true }))
    }
}

/// What a delete request addresses
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeleteTarget {
    Id { id: NodeId },
    Path { path: String },
    Name { name: String },
}

/// `POST /api/nodes/delete` by id, by path, or (when enabled) by name
pub struct DeleteNodeHandler {
    session: SharedSession,
}

impl DeleteNodeHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for DeleteNodeHandler {
    fn path_pattern(&self) -> &str {
        "/api/nodes/delete"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let target: DeleteTarget = request.json()?;
        let mut session = self.session.lock().await;

        match target {
            DeleteTarget::Id { id } => session.delete_node(id).await?,
            DeleteTarget::Path { path } => session.delete_path(&path).await?,
            DeleteTarget::Name { name } => session.delete_by_name(&name).await?,
        }
        HttpResponse::json(&json!({ "success": true }))
    }
}

#[derive(Debug, Deserialize)]
struct SelectBody {
    id: NodeId,
}

/// `POST /api/select`: make a file active and return it with the snapshot
pub struct SelectHandler {
    session: SharedSession,
}

impl SelectHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for SelectHandler {
    fn path_pattern(&self) -> &str {
        "/api/select"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let body: SelectBody = request.json()?;
        let mut session = self.session.lock().await;
        session.select(body.id)?;

        let content = session
            .active_file()
            .map(|(_, file)| file.content.clone())
            .unwrap_or_default();
        HttpResponse::json(&json!({
            "content": content,
            "session": session.snapshot(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct EditBody {
    content: String,
}

/// `POST /api/edit`: replace the active file's content
pub struct EditHandler {
    session: SharedSession,
}

impl EditHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for EditHandler {
    fn path_pattern(&self) -> &str {
        "/api/edit"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let body: EditBody = request.json()?;
        let mut session = self.session.lock().await;
        session.edit(&body.content).await?;
        HttpResponse::json(&session.snapshot())
    }
}

/// `POST /api/run`: validate the active file and publish a preview when allowed
pub struct RunHandler {
    session: SharedSession,
}

impl RunHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for RunHandler {
    fn path_pattern(&self) -> &str {
        "/api/run"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    async fn handle(&self, _request: HttpRequest) -> Result<HttpResponse> {
        let outcome = self.session.lock().await.run().await?;
        HttpResponse::json(&outcome)
    }
}

#[derive(Debug, Deserialize)]
struct NavigateBody {
    index: usize,
}

/// `POST /api/navigate`: jump to a diagnostic
pub struct NavigateHandler {
    session: SharedSession,
}

impl NavigateHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for NavigateHandler {
    fn path_pattern(&self) -> &str {
        "/api/navigate"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let body: NavigateBody = request.json()?;
        let highlight = self.session.lock().await.navigate_to(body.index)?;
        HttpResponse::json(&highlight)
    }
}

/// `GET /api/export`: the project as a zip download
pub struct ExportHandler {
    session: SharedSession,
}

impl ExportHandler {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl HttpHandler for ExportHandler {
    fn path_pattern(&self) -> &str {
        "/api/export"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    async fn handle(&self, _request: HttpRequest) -> Result<HttpResponse> {
        let bytes = self.session.lock().await.export_archive().await?;

        Ok(HttpResponse::new(StatusCode::OK)
            .with_header("content-type", "application/zip")
            .with_header(
                "content-disposition",
                &format!("attachment; filename=\"{}\"", ARCHIVE_FILE_NAME),
            )
            .with_body(bytes))
    }
}

/// `GET /preview/{id}`: a published preview document
pub struct PreviewHandler {
    previews: PreviewStore,
}

impl PreviewHandler {
    pub fn new(previews: PreviewStore) -> Self {
        Self { previews }
    }
}

#[async_trait]
impl HttpHandler for PreviewHandler {
    fn path_pattern(&self) -> &str {
        "/preview"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    fn matches_path(&self, path: &str) -> bool {
        path.starts_with("/preview/")
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let document = request
            .path_tail(self.path_pattern())
            .and_then(|tail| tail.parse::<Uuid>().ok())
            .and_then(|id| self.previews.get(id));

        match document {
            Some(document) => {
                // Opaque origin: preview scripts run but cannot reach the API
                Ok(HttpResponse::html(&document.html)
                    .with_header("cache-control", "no-store")
                    .with_header("content-security-policy", "sandbox allow-scripts"))
            }
            None => Ok(HttpResponse::error(
                StatusCode::NOT_FOUND,
                "Preview expired or not found",
            )),
        }
    }
}

/// Forum message as shown to clients
#[derive(Debug, Serialize)]
struct MessageView<'a> {
    sequence: u64,
    author: &'a str,
    body: &'a str,
    display_time: String,
    is_new: bool,
}

impl<'a> From<&'a ForumMessage> for MessageView<'a> {
    fn from(message: &'a ForumMessage) -> Self {
        Self {
            sequence: message.sequence,
            author: &message.author,
            body: &message.body,
            display_time: message.display_time(),
            is_new: message.is_new,
        }
    }
}

/// `GET /api/forum`: message history in posting order
pub struct ForumListHandler {
    forum: Arc<dyn ForumChannel>,
}

impl ForumListHandler {
    pub fn new(forum: Arc<dyn ForumChannel>) -> Self {
        Self { forum }
    }
}

#[async_trait]
impl HttpHandler for ForumListHandler {
    fn path_pattern(&self) -> &str {
        "/api/forum"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    async fn handle(&self, _request: HttpRequest) -> Result<HttpResponse> {
        let history = self.forum.subscribe().await.history;
        let messages: Vec<MessageView> = history.iter().map(MessageView::from).collect();
        let new_messages = history.iter().filter(|m| m.is_new).count();

        HttpResponse::json(&json!({
            "messages": messages,
            "new_messages": new_messages,
        }))
    }
}

/// `POST /api/forum`
pub struct ForumPostHandler {
    forum: Arc<dyn ForumChannel>,
}

impl ForumPostHandler {
    pub fn new(forum: Arc<dyn ForumChannel>) -> Self {
        Self { forum }
    }
}

#[async_trait]
impl HttpHandler for ForumPostHandler {
    fn path_pattern(&self) -> &str {
        "/api/forum"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let post: ForumPost = request.json()?;
        let message = self.forum.publish(post).await?;
        Ok(HttpResponse::json(&MessageView::from(&message))?.with_status(StatusCode::CREATED))
    }
}

/// `GET /api/album`
pub struct AlbumListHandler {
    album: Arc<Album>,
}

impl AlbumListHandler {
    pub fn new(album: Arc<Album>) -> Self {
        Self { album }
    }
}

#[async_trait]
impl HttpHandler for AlbumListHandler {
    fn path_pattern(&self) -> &str {
        "/api/album"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    async fn handle(&self, _request: HttpRequest) -> Result<HttpResponse> {
        let photos = self.album.photos().await?;
        HttpResponse::json(&json!({ "photos": photos }))
    }
}

#[derive(Debug, Deserialize)]
struct AlbumAddBody {
    data_uri: String,
}

/// `POST /api/album`
pub struct AlbumAddHandler {
    album: Arc<Album>,
}

impl AlbumAddHandler {
    pub fn new(album: Arc<Album>) -> Self {
        Self { album }
    }
}

#[async_trait]
impl HttpHandler for AlbumAddHandler {
    fn path_pattern(&self) -> &str {
        "/api/album"
    }

    fn method(&self) -> Method {
        Method::POST
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let body: AlbumAddBody = request.json()?;
        let index = self.album.add(body.data_uri).await?;
        Ok(HttpResponse::json(&json!({ "success": true, "index": index }))?
            .with_status(StatusCode::CREATED))
    }
}

/// `DELETE /api/album/{index}`
pub struct AlbumRemoveHandler {
    album: Arc<Album>,
}

impl AlbumRemoveHandler {
    pub fn new(album: Arc<Album>) -> Self {
        Self { album }
    }
}

#[async_trait]
impl HttpHandler for AlbumRemoveHandler {
    fn path_pattern(&self) -> &str {
        "/api/album"
    }

    fn method(&self) -> Method {
        Method::DELETE
    }

    fn matches_path(&self, path: &str) -> bool {
        path.starts_with("/api/album/")
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let index = request
            .path_tail(self.path_pattern())
            .and_then(|tail| tail.parse::<usize>().ok())
            .ok_or_else(|| AtelierError::invalid_input("album index must be a number"))?;

        match self.album.remove(index).await? {
            Some(_) => HttpResponse::json(&json!({ "success": true })),
            None => Ok(HttpResponse::error(
                StatusCode::NOT_FOUND,
                &format!("No photo at index {}", index),
            )),
        }
    }
}
