//! JSON HTTP API over the registry, indexer, retrieval engine and chat
//! orchestrator.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/knowledge-bases` | List knowledge bases with document counts |
//! | `POST`   | `/knowledge-bases` | Create a knowledge base (`{"name": ...}`) |
//! | `GET`    | `/knowledge-bases/{kb}` | One knowledge base |
//! | `DELETE` | `/knowledge-bases/{kb}` | Delete a knowledge base and everything in it |
//! | `GET`    | `/knowledge-bases/{kb}/files` | Files, index status, orphaned vectors |
//! | `PUT`    | `/knowledge-bases/{kb}/files/{filename}` | Upload (raw body) |
//! | `DELETE` | `/knowledge-bases/{kb}/files/{filename}` | Delete a file and its chunks |
//! | `POST`   | `/knowledge-bases/{kb}/index` | Index one file or all files |
//! | `POST`   | `/knowledge-bases/{kb}/reconcile` | Remove orphaned chunks |
//! | `POST`   | `/retrieve` | Top-K contexts for a query |
//! | `POST`   | `/chat` | Retrieval-augmented answer with its contexts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "knowledge base not found: Docs" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `already_exists` (409),
//! `file_changed` (409), `dimension_mismatch` (422), `timeout` (408),
//! `upstream_error` (502), `service_unavailable` (503), `internal` (500).
//!
//! A client that disconnects mid-request drops the handler future, which
//! cancels any in-flight embedding or generation call.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use ragbase_core::chunk::ChunkingConfig;
use ragbase_core::models::{ChatMessage, ChatResponse, KnowledgeBase, RetrievalContext};
use ragbase_core::RagError;

use crate::ingest::{IndexAllReport, IndexReport};
use crate::registry::{DeleteReport, FileDeleteReport, FileListing, ReconcileReport, UploadReport};
use crate::services::Services;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// Build the router. Split from [`run_server`] so tests can serve it on an
/// ephemeral port.
pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/knowledge-bases",
            get(handle_list_kbs).post(handle_create_kb),
        )
        .route(
            "/knowledge-bases/{kb}",
            get(handle_get_kb).delete(handle_delete_kb),
        )
        .route("/knowledge-bases/{kb}/files", get(handle_list_files))
        .route(
            "/knowledge-bases/{kb}/files/{filename}",
            put(handle_upload).delete(handle_delete_file),
        )
        .route("/knowledge-bases/{kb}/index", post(handle_index))
        .route("/knowledge-bases/{kb}/reconcile", post(handle_reconcile))
        .route("/retrieve", post(handle_retrieve))
        .route("/chat", post(handle_chat))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { services })
}

/// Serve on `[server].bind` until Ctrl-C.
pub async fn run_server(services: Arc<Services>) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::InvalidInput(_) | RagError::InvalidConfiguration(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            RagError::KnowledgeBaseNotFound(_) | RagError::FileNotFound { .. } => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            RagError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            RagError::FileChanged { .. } => (StatusCode::CONFLICT, "file_changed"),
            RagError::DimensionMismatch { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "dimension_mismatch")
            }
            RagError::Timeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            RagError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            RagError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            RagError::PartialDeletionFailure { .. }
            | RagError::DocumentStore(_)
            | RagError::VectorIndex(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

/// Malformed, mistyped or non-JSON request bodies use the same error shape
/// as every other failure.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: rejection.body_text(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Knowledge bases ============

#[derive(Serialize)]
struct KbListResponse {
    knowledge_bases: Vec<KnowledgeBase>,
}

async fn handle_list_kbs(State(state): State<AppState>) -> ApiResult<KbListResponse> {
    let knowledge_bases = state.services.registry.list().await?;
    Ok(Json(KbListResponse { knowledge_bases }))
}

#[derive(Deserialize)]
struct CreateKbRequest {
    name: String,
}

async fn handle_create_kb(
    State(state): State<AppState>,
    payload: Result<Json<CreateKbRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<KnowledgeBase>), AppError> {
    let Json(req) = payload?;
    let kb = state.services.registry.create(&req.name).await?;
    Ok((StatusCode::CREATED, Json(kb)))
}

async fn handle_get_kb(
    State(state): State<AppState>,
    Path(kb): Path<String>,
) -> ApiResult<KnowledgeBase> {
    Ok(Json(state.services.registry.get(&kb).await?))
}

async fn handle_delete_kb(
    State(state): State<AppState>,
    Path(kb): Path<String>,
) -> ApiResult<DeleteReport> {
    Ok(Json(state.services.registry.delete(&kb).await?))
}

// ============ Files ============

async fn handle_list_files(
    State(state): State<AppState>,
    Path(kb): Path<String>,
) -> ApiResult<FileListing> {
    Ok(Json(state.services.registry.list_files(&kb).await?))
}

async fn handle_upload(
    State(state): State<AppState>,
    Path((kb, filename)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadReport>), AppError> {
    let report = state
        .services
        .registry
        .upload_file(&kb, &filename, &body)
        .await?;
    let status = if report.replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(report)))
}

async fn handle_delete_file(
    State(state): State<AppState>,
    Path((kb, filename)): Path<(String, String)>,
) -> ApiResult<FileDeleteReport> {
    Ok(Json(
        state.services.registry.delete_file(&kb, &filename).await?,
    ))
}

// ============ Indexing ============

#[derive(Deserialize, Default)]
struct IndexRequest {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    chunk_size: Option<usize>,
    #[serde(default)]
    overlap: Option<usize>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum IndexResponse {
    File(IndexReport),
    All(IndexAllReport),
}

async fn handle_index(
    State(state): State<AppState>,
    Path(kb): Path<String>,
    body: Bytes,
) -> ApiResult<IndexResponse> {
    // The body is optional; an empty one indexes every file with defaults.
    let req: IndexRequest = if body.iter().all(u8::is_ascii_whitespace) {
        IndexRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| RagError::InvalidInput(format!("invalid index request: {}", e)))?
    };
    let chunking = chunking_override(&state.services, req.chunk_size, req.overlap)?;
    let indexer = &state.services.indexer;

    let response = match req.filename {
        Some(filename) => {
            IndexResponse::File(indexer.index_file(&kb, &filename, chunking.as_ref()).await?)
        }
        None => IndexResponse::All(indexer.index_all(&kb, chunking.as_ref()).await?),
    };
    Ok(Json(response))
}

/// Per-request chunking override; unspecified fields fall back to config.
fn chunking_override(
    services: &Services,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
) -> Result<Option<ChunkingConfig>, RagError> {
    if chunk_size.is_none() && overlap.is_none() {
        return Ok(None);
    }
    let base = services.config.chunking.to_chunking();
    ChunkingConfig::new(
        chunk_size.unwrap_or(base.chunk_size),
        overlap.unwrap_or(base.overlap),
    )
    .map(Some)
}

async fn handle_reconcile(
    State(state): State<AppState>,
    Path(kb): Path<String>,
) -> ApiResult<ReconcileReport> {
    Ok(Json(state.services.registry.reconcile(&kb).await?))
}

// ============ POST /retrieve ============

#[derive(Deserialize)]
struct RetrieveRequest {
    kb_name: String,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct RetrieveResponse {
    contexts: Vec<RetrievalContext>,
}

async fn handle_retrieve(
    State(state): State<AppState>,
    payload: Result<Json<RetrieveRequest>, JsonRejection>,
) -> ApiResult<RetrieveResponse> {
    let Json(req) = payload?;
    let contexts = state
        .services
        .retrieval
        .retrieve(&req.kb_name, &req.query, req.top_k)
        .await?;
    Ok(Json(RetrieveResponse { contexts }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    kb_name: String,
    query: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<ChatResponse> {
    let Json(req) = payload?;
    let response = state
        .services
        .chat
        .chat(&req.kb_name, &req.query, &req.history, req.top_k)
        .await?;
    Ok(Json(response))
}
