//! Axum HTTP transport (§1 out-of-scope external collaborator, §6 wire protocol).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::indexer::Indexer;
use crate::search::HybridSearchEngine;
use crate::storage::Storage;
use crate::types::{Document, DocumentInput, SearchQuery};
use crate::vector_index::VectorIndex;
use crate::watcher::Watcher;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<HybridSearchEngine>,
    pub indexer: Arc<Indexer>,
    pub storage: Arc<dyn Storage>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub watcher: Option<Arc<Watcher>>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Build the router with a per-request deadline (§5: "the HTTP layer imposes
/// a per-request deadline"). A request that doesn't complete within
/// `request_timeout` is answered with 504 rather than left to hang.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/search", post(search))
        .route("/api/v1/documents", post(create_document))
        .route("/api/v1/documents/:id", get(get_document))
        .route("/api/v1/documents/:id", delete(delete_document))
        .route(
            "/api/v1/watch/directories",
            get(list_watch_directories)
                .post(add_watch_directory)
                .delete(remove_watch_directory),
        )
        .route("/api/v1/status", get(status))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(request_timeout))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

async fn handle_timeout_error(err: tower::BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::GATEWAY_TIMEOUT,
            Json(ErrorBody { error: "request exceeded the server's per-request deadline".to_string() }),
        )
            .into_response()
    } else {
        Error::backend(format!("unhandled middleware error: {err}")).into_response()
    }
}

pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    request_timeout_secs: u64,
) -> crate::error::Result<()> {
    let app = router(state, Duration::from_secs(request_timeout_secs));
    let addr = format!("{host}:{port}");
    tracing::info!(addr, "hybrid-doc-search listening");
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(Error::from)?;
    axum::serve(listener, app).await.map_err(|e| Error::backend(format!("server error: {e}")))?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn search(
    State(state): State<AppState>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<crate::types::SearchResponse>, Error> {
    let response = state.engine.search(query).await?;
    Ok(Json(response))
}

#[derive(Serialize)]
struct IndexedResponse {
    id: String,
    status: &'static str,
}

async fn create_document(
    State(state): State<AppState>,
    Json(input): Json<DocumentInput>,
) -> Result<(StatusCode, Json<IndexedResponse>), Error> {
    let doc = tokio::task::spawn_blocking(move || state.indexer.index_document(input))
        .await
        .map_err(|e| Error::backend(format!("index task: {e}")))??;
    Ok((
        StatusCode::CREATED,
        Json(IndexedResponse { id: doc.id, status: "indexed" }),
    ))
}

async fn get_document(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Document>, Error> {
    let doc = state.storage.get_document(&id)?;
    Ok(Json(doc))
}

#[derive(Serialize)]
struct DeletedResponse {
    status: &'static str,
}

async fn delete_document(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<DeletedResponse>, Error> {
    tokio::task::spawn_blocking(move || state.indexer.delete_document(&id))
        .await
        .map_err(|e| Error::backend(format!("delete task: {e}")))??;
    Ok(Json(DeletedResponse { status: "deleted" }))
}

#[derive(Serialize)]
struct DirectoriesResponse {
    directories: Vec<PathBuf>,
}

async fn list_watch_directories(State(state): State<AppState>) -> Result<Json<DirectoriesResponse>, Error> {
    let watcher = state
        .watcher
        .as_ref()
        .ok_or_else(|| Error::not_implemented("watcher disabled"))?;
    Ok(Json(DirectoriesResponse { directories: watcher.list_directories() }))
}

#[derive(Deserialize)]
struct WatchDirectoryRequest {
    path: PathBuf,
    #[serde(default)]
    sync: bool,
}

#[derive(Serialize)]
struct WatchDirectoryResponse {
    path: PathBuf,
    status: &'static str,
}

async fn add_watch_directory(
    State(state): State<AppState>,
    Json(body): Json<WatchDirectoryRequest>,
) -> Result<(StatusCode, Json<WatchDirectoryResponse>), Error> {
    let watcher = state
        .watcher
        .as_ref()
        .ok_or_else(|| Error::not_implemented("watcher disabled"))?;
    if !body.path.exists() {
        return Err(Error::not_found(format!("{} does not exist", body.path.display())));
    }
    watcher.add_directory(&body.path, body.sync)?;
    Ok((
        StatusCode::CREATED,
        Json(WatchDirectoryResponse { path: body.path, status: "added" }),
    ))
}

#[derive(Deserialize)]
struct RemoveWatchDirectoryQuery {
    path: Option<PathBuf>,
}

async fn remove_watch_directory(
    State(state): State<AppState>,
    Query(query): Query<RemoveWatchDirectoryQuery>,
    body: Option<Json<WatchDirectoryRequest>>,
) -> Result<Json<WatchDirectoryResponse>, Error> {
    let path = query
        .path
        .or_else(|| body.map(|Json(b)| b.path))
        .ok_or_else(|| Error::invalid("path is required"))?;
    let watcher = state
        .watcher
        .as_ref()
        .ok_or_else(|| Error::not_implemented("watcher disabled"))?;
    watcher.remove_directory(&path)?;
    Ok(Json(WatchDirectoryResponse { path, status: "removed" }))
}

#[derive(Serialize)]
struct StatusResponse {
    documents: u64,
    chunks: u64,
    vector_index_size: usize,
    disk_usage_bytes: Option<u64>,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, Error> {
    Ok(Json(StatusResponse {
        documents: state.storage.count_documents()?,
        chunks: state.storage.count_chunks()?,
        vector_index_size: state.vector_index.size(),
        disk_usage_bytes: None,
    }))
}
