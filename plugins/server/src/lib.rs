//! Server plugin exposing the editor session over HTTP
//!
//! Requests reach a single axum fallback that dispatches to [`HttpHandler`]s held
//! in a [`HandlerRegistry`]. Handlers are registered at initialization from the
//! shared resources published by the preview and editor plugins.

pub mod handlers;

use async_trait::async_trait;
use atelier_core::{
    config::ServerConfig,
    error::{AtelierError, Result},
    forum::{ForumChannel, InMemoryForum},
    plugin::{Plugin, PluginContext, PluginStatus},
    tree::TreeError,
    Album,
};
use atelier_editor::{EditorSession, ALBUM_RESOURCE, EDITOR_SESSION_RESOURCE};
use atelier_preview::{PreviewStore, PREVIEW_STORE_RESOURCE};
use axum::{
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{Mutex, RwLock},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Shared resource key of the forum channel
pub const FORUM_RESOURCE: &str = "forum";

/// HTTP handler trait for processing HTTP requests
#[async_trait]
pub trait HttpHandler: Send + Sync {
    /// Path this handler serves (e.g. "/api/run")
    fn path_pattern(&self) -> &str;

    /// HTTP method this handler supports
    fn method(&self) -> Method;

    /// Handle the HTTP request
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Handler priority (lower numbers = higher priority)
    fn priority(&self) -> i32 {
        0
    }

    /// Check if this handler can process the given request
    fn can_handle(&self, path: &str, method: &Method) -> bool {
        self.method() == *method && self.matches_path(path)
    }

    /// Exact match by default; handlers addressing sub-resources override this
    fn matches_path(&self, path: &str) -> bool {
        path == self.path_pattern()
    }
}

/// HTTP request wrapper
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query_params: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query_params: HashMap::new(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> Self {
        self.body = serde_json::to_vec(body).unwrap_or_default();
        self
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AtelierError::invalid_input(format!("Invalid request body: {}", e)))
    }

    /// The single path segment following `prefix`, e.g. the id in `/preview/{id}`
    pub fn path_tail(&self, prefix: &str) -> Option<&str> {
        let tail = self.path.strip_prefix(prefix)?.strip_prefix('/')?;
        (!tail.is_empty() && !tail.contains('/')).then_some(tail)
    }
}

/// HTTP response wrapper
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a header; invalid names or values are ignored
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        use axum::http::header::{HeaderName, HeaderValue};
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Create a JSON response
    pub fn json<T: Serialize>(data: &T) -> Result<Self> {
        let body = serde_json::to_vec(data)
            .map_err(|e| AtelierError::Server(format!("JSON serialization failed: {}", e)))?;

        Ok(Self::new(StatusCode::OK)
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    /// Create an HTML response
    pub fn html(content: &str) -> Self {
        Self::new(StatusCode::OK)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(content.as_bytes())
    }

    /// Create a JSON error response `{"success": false, "error": message}`
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "success": false, "error": message });
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    /// Map a handler failure to a status code and error body
    pub fn from_error(err: &AtelierError) -> Self {
        let status = match err {
            AtelierError::Tree(TreeError::NodeNotFound(_) | TreeError::PathNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            AtelierError::InvalidInput(_) | AtelierError::Tree(_) | AtelierError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            AtelierError::Storage(_) | AtelierError::QuotaExceeded { .. } => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::error(status, &err.to_string())
    }
}

impl IntoResponse for HttpResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Registry of HTTP handlers consulted in priority order
pub struct HandlerRegistry {
    http_handlers: RwLock<Vec<Arc<dyn HttpHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            http_handlers: RwLock::new(Vec::new()),
        }
    }

    pub async fn register_http_handler(&self, handler: Arc<dyn HttpHandler>) {
        info!(
            "Registering HTTP handler: {} {}",
            handler.method(),
            handler.path_pattern()
        );

        let mut handlers = self.http_handlers.write().await;
        handlers.push(handler);
        handlers.sort_by_key(|h| h.priority());
    }

    /// Find the handler for a request
    pub async fn find_http_handler(
        &self,
        path: &str,
        method: &Method,
    ) -> Option<Arc<dyn HttpHandler>> {
        let handlers = self.http_handlers.read().await;
        handlers
            .iter()
            .find(|handler| handler.can_handle(path, method))
            .cloned()
    }

    /// Route a request to its handler and turn failures into error responses
    pub async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        let method = request.method.clone();
        let path = request.path.clone();

        let Some(handler) = self.find_http_handler(&path, &method).await else {
            tracing::debug!("No handler found for {} {}", method, path);
            return HttpResponse::error(StatusCode::NOT_FOUND, "Not found");
        };

        match handler.handle(request).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_recoverable() {
                    tracing::debug!("Request {} {} rejected: {}", method, path, e);
                } else {
                    error!("Handler error for {} {}: {}", method, path, e);
                }
                HttpResponse::from_error(&e)
            }
        }
    }

    /// List registered handlers as (path, method, priority)
    pub async fn list_http_handlers(&self) -> Vec<(String, Method, i32)> {
        let handlers = self.http_handlers.read().await;
        handlers
            .iter()
            .map(|h| (h.path_pattern().to_string(), h.method(), h.priority()))
            .collect()
    }

    pub async fn clear_all_handlers(&self) {
        self.http_handlers.write().await.clear();
        info!("Cleared all registered handlers");
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the API handlers operate on
#[derive(Clone)]
pub struct ApiServices {
    pub session: Arc<Mutex<EditorSession>>,
    pub previews: PreviewStore,
    pub album: Arc<Album>,
    pub forum: Arc<dyn ForumChannel>,
}

/// Server plugin implementation
pub struct ServerPlugin {
    name: String,
    version: String,
    status: PluginStatus,
    config: Option<ServerConfig>,
    handler_registry: Option<Arc<HandlerRegistry>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl ServerPlugin {
    pub fn new() -> Self {
        Self {
            name: "server".to_string(),
            version: "0.1.0".to_string(),
            status: PluginStatus::Loading,
            config: None,
            handler_registry: None,
            server_handle: None,
            local_addr: None,
        }
    }

    /// Use `config` instead of the `server` section of the engine config
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn handler_registry(&self) -> Option<Arc<HandlerRegistry>> {
        self.handler_registry.clone()
    }

    /// Address the listener is bound to, once the plugin is initialized
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn collect_services(context: &PluginContext) -> Result<ApiServices> {
        let session = context
            .get_shared_resource::<Mutex<EditorSession>>(EDITOR_SESSION_RESOURCE)
            .await
            .ok_or_else(|| AtelierError::plugin("Editor session not found in shared resources"))?;
        let previews = context
            .get_shared_resource::<PreviewStore>(PREVIEW_STORE_RESOURCE)
            .await
            .ok_or_else(|| AtelierError::plugin("Preview store not found in shared resources"))?;
        let album = context
            .get_shared_resource::<Album>(ALBUM_RESOURCE)
            .await
            .ok_or_else(|| AtelierError::plugin("Album not found in shared resources"))?;

        let forum = match context
            .get_shared_resource::<InMemoryForum>(FORUM_RESOURCE)
            .await
        {
            Some(forum) => forum,
            None => {
                let forum = Arc::new(InMemoryForum::new());
                context
                    .set_shared_resource(FORUM_RESOURCE, forum.clone())
                    .await;
                forum
            }
        };

        Ok(ApiServices {
            session,
            previews: previews.as_ref().clone(),
            album,
            forum,
        })
    }

    /// Build the axum router dispatching every request through `registry`
    pub fn build_router(registry: Arc<HandlerRegistry>, enable_cors: bool) -> Router {
        let router = Router::new().fallback(move |req| {
            let registry = registry.clone();
            async move { Self::handle_http_request(req, registry).await }
        });

        if enable_cors {
            router.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        } else {
            router
        }
    }

    async fn handle_http_request(
        req: axum::extract::Request,
        registry: Arc<HandlerRegistry>,
    ) -> Response {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let headers = req.headers().clone();

        let query_params: HashMap<String, String> = uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        let (_parts, body) = req.into_parts();
        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                return HttpResponse::error(
                    StatusCode::BAD_REQUEST,
                    &format!("Failed to read request body: {}", e),
                )
                .into_response()
            }
        };

        let request = HttpRequest {
            method,
            path: uri.path().to_string(),
            query_params,
            headers,
            body,
        };

        registry.dispatch(request).await.into_response()
    }
}

impl Default for ServerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ServerPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dependencies(&self) -> Vec<&str> {
        vec!["preview", "editor"]
    }

    async fn initialize(&mut self, context: &PluginContext) -> Result<()> {
        info!("Initializing server plugin");

        let config = self
            .config
            .clone()
            .unwrap_or_else(|| context.config.server.clone());

        let services = Self::collect_services(context).await?;
        let registry = Arc::new(HandlerRegistry::new());
        handlers::register_api_handlers(&registry, services).await;
        context
            .set_shared_resource("server_handler_registry", registry.clone())
            .await;

        let router = Self::build_router(registry.clone(), config.enable_cors);
        let addr = format!("{}:{}", config.hostname, config.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AtelierError::Server(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("Server error: {}", e);
            }
        });

        info!("Atelier listening on http://{}", local_addr);
        self.handler_registry = Some(registry);
        self.server_handle = Some(server_handle);
        self.local_addr = Some(local_addr);
        self.config = Some(config);
        self.status = PluginStatus::Active;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down server plugin");

        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
        if let Some(registry) = self.handler_registry.take() {
            registry.clear_all_handlers().await;
        }

        self.local_addr = None;
        self.status = PluginStatus::Disabled;
        info!("Server plugin shutdown complete");
        Ok(())
    }

    fn status(&self) -> PluginStatus {
        self.status.clone()
    }

    fn provided_services(&self) -> Vec<&str> {
        vec!["http_server", "handler_registry"]
    }
}
