use crate::backup::BackupRotation;
use crate::config::ServerConfig;
use crate::error::VisitAtlasError;
use crate::guard;
use crate::storage::{self, VisitFileStore};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub const SAVE_ROUTE: &str = "/save-visits";
const INDEX_PAGE: &str = "editor.html";

#[derive(Clone)]
pub struct AppState {
    pub root: Arc<PathBuf>,
    pub store: Arc<VisitFileStore>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        let store = VisitFileStore::with_rotation(
            config.store_file(),
            BackupRotation::new(config.retain),
        );
        Self {
            root: Arc::new(config.root.clone()),
            store: Arc::new(store),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResponse {
    pub ok: bool,
    pub backup: Option<String>,
}

impl IntoResponse for VisitAtlasError {
    fn into_response(self) -> Response {
        let status = match &self {
            VisitAtlasError::Validation(_) | VisitAtlasError::BadPath(_) => StatusCode::BAD_REQUEST,
            VisitAtlasError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// `POST /save-visits` goes through the loopback guard; every other request,
/// including other methods on the save path, is a static file lookup.
pub fn router(state: AppState) -> Router {
    let save = post(save_visits)
        .route_layer(middleware::from_fn(require_loopback))
        .fallback(serve_static);

    Router::new()
        .route(SAVE_ROUTE, save)
        .fallback(serve_static)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Runs before the body extractor, so rejected callers never get their body
// read and never reach the store.
async fn require_loopback(req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    match guard::check_origin(peer) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            warn!("Rejected save from {:?}", peer);
            e.into_response()
        }
    }
}

async fn save_visits(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SaveResponse>, VisitAtlasError> {
    let document = storage::parse_document(&body)?;
    debug!("Saving {} visit records", document.len());

    let store = state.store.clone();
    let outcome = tokio::task::spawn_blocking(move || store.save_document(document))
        .await
        .map_err(|e| VisitAtlasError::Storage(e.to_string()))??;

    Ok(Json(SaveResponse {
        ok: true,
        backup: outcome.backup.map(|p| p.display().to_string()),
    }))
}

/// Map a request path onto a path relative to the root. `..` may not climb
/// above the root.
pub fn resolve_request_path(request_path: &str) -> crate::Result<PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in request_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(VisitAtlasError::BadPath(request_path.to_string()));
                }
            }
            s if s.contains('\\') || s.contains(':') => {
                return Err(VisitAtlasError::BadPath(request_path.to_string()));
            }
            s => parts.push(s),
        }
    }

    if parts.is_empty() {
        return Ok(PathBuf::from(INDEX_PAGE));
    }
    let resolved: PathBuf = parts.iter().collect();
    if !guard::is_contained(&resolved) {
        return Err(VisitAtlasError::BadPath(request_path.to_string()));
    }
    Ok(resolved)
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html") => "text/html",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

async fn serve_static(State(state): State<AppState>, req: Request) -> Response {
    let rel = match resolve_request_path(req.uri().path()) {
        Ok(rel) => rel,
        Err(e) => {
            debug!("{}", e);
            return (StatusCode::BAD_REQUEST, "Bad request").into_response();
        }
    };

    let path = state.root.join(&rel);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    }

    let content_type = content_type_for(&path);
    match ServeFile::new(&path).oneshot(req).await {
        Ok(mut response) => {
            if response.status().is_success() {
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
            response.into_response()
        }
        Err(never) => match never {},
    }
}

pub async fn serve(mut config: ServerConfig) -> crate::Result<()> {
    config.validate()?;
    config.canonicalize_root()?;
    let addr = config.socket_addr();
    let app = router(AppState::new(&config));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Editor server listening at http://{}", listener.local_addr()?);
    info!("Visit store: {}", config.store_file().display());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Editor server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
