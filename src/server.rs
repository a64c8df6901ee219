//! HTTP API for ingesting documents and asking questions.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, and whether an index is loaded |
//! | `POST` | `/ingest` | Rebuild the index from the configured default document |
//! | `POST` | `/use-file/{filename}` | Rebuild the index from a file in the data directory |
//! | `POST` | `/upload` | Save a multipart `file` field into the data directory |
//! | `GET`  | `/files` | Supported files in the data directory |
//! | `POST` | `/chat` | Answer `{ "message": "..." }` from the indexed document |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "knowledge_base_not_ready", "message": "...", "stage": "retrieval" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `knowledge_base_not_ready` (409), `corrupt_index` (500), `internal` (500),
//! `upstream_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends on
//! another port can call the API.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::{Config, DocumentsConfig};
use crate::error::KbError;
use crate::extract::{is_supported, list_supported_files};
use crate::kb::KnowledgeBase;
use crate::progress::NoProgress;

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    kb: Arc<KnowledgeBase>,
    documents: Arc<DocumentsConfig>,
}

/// Build the router over an existing knowledge base.
pub fn router(kb: Arc<KnowledgeBase>, documents: DocumentsConfig) -> Router {
    let state = AppState {
        kb,
        documents: Arc::new(documents),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/use-file/{filename}", post(handle_use_file))
        .route("/files", get(handle_files))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

/// Serve on an already-bound listener until the process exits.
pub async fn serve_with(
    kb: Arc<KnowledgeBase>,
    documents: DocumentsConfig,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    axum::serve(listener, router(kb, documents)).await?;
    Ok(())
}

/// Starts the HTTP server on `[server].bind`.
///
/// A persisted index from a previous run is loaded first. If it cannot be
/// loaded the server still starts, not ready, and `/ingest` rebuilds it.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let kb = Arc::new(KnowledgeBase::from_config(config)?);
    match kb.load_persisted() {
        Ok(true) => info!("serving persisted index"),
        Ok(false) => info!("no persisted index; POST /ingest to build one"),
        Err(e) => error!(error = %e, "persisted index unusable; POST /ingest to rebuild"),
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("kbh server listening on http://{}", config.server.bind);
    serve_with(kb, config.documents.clone(), listener).await
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
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    stage: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
                stage: self.stage,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
        stage: None,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
        stage: None,
    }
}

fn internal(message: impl Into<String>) -> AppError {
    let message = message.into();
    error!(error = %message, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message,
        stage: None,
    }
}

impl From<KbError> for AppError {
    fn from(err: KbError) -> Self {
        let (status, code) = match &err {
            e if e.is_not_ready() => (StatusCode::CONFLICT, "knowledge_base_not_ready"),
            e if e.is_upstream() => (StatusCode::BAD_GATEWAY, "upstream_error"),
            KbError::InvalidK(_)
            | KbError::EmptyQuery
            | KbError::Extraction(_)
            | KbError::ContextBudgetExceeded { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            KbError::IngestTimeout(_) => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            KbError::CorruptIndex(_) => (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_index"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!(error = %err, stage = %err.stage(), "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
            stage: Some(err.stage().to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    ready: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ready: state.kb.is_ready(),
    })
}

// ============ Ingest ============

#[derive(Serialize)]
struct IngestResponse {
    status: String,
    file: String,
    chunks_count: usize,
    document_sha256: String,
    elapsed_ms: u64,
}

async fn ingest(state: &AppState, filename: &str) -> Result<Json<IngestResponse>, AppError> {
    let path = state.documents.data_dir.join(filename);
    if !path.is_file() {
        return Err(not_found(format!("file not found: {}", filename)));
    }
    let report = state.kb.ingest_file(&path, &NoProgress).await?;
    Ok(Json(IngestResponse {
        status: "ingested".to_string(),
        file: filename.to_string(),
        chunks_count: report.chunks_indexed,
        document_sha256: report.document_sha256,
        elapsed_ms: report.elapsed_ms,
    }))
}

async fn handle_ingest(State(state): State<AppState>) -> Result<Json<IngestResponse>, AppError> {
    let filename = state.documents.default_file.clone();
    ingest(&state, &filename).await
}

async fn handle_use_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<IngestResponse>, AppError> {
    check_file_name(&filename)?;
    ingest(&state, &filename).await
}

/// Only bare, supported file names inside the data directory.
fn check_file_name(filename: &str) -> Result<(), AppError> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.starts_with('.')
    {
        return Err(bad_request(format!("invalid file name: {}", filename)));
    }
    if !is_supported(std::path::Path::new(filename)) {
        return Err(bad_request(format!("unsupported file type: {}", filename)));
    }
    Ok(())
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    status: String,
    filename: String,
    message: String,
}

/// Stores the `file` field under the data directory. Indexing is a separate
/// `/use-file` call.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("upload field 'file' has no file name"))?;
        check_file_name(&filename)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("reading upload {}: {}", filename, e)))?;

        let dir = &state.documents.data_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| internal(format!("creating {}: {}", dir.display(), e)))?;
        let path = dir.join(&filename);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| internal(format!("writing {}: {}", path.display(), e)))?;
        info!(file = %filename, bytes = bytes.len(), "upload saved");

        return Ok(Json(UploadResponse {
            status: "success".to_string(),
            message: format!(
                "Uploaded '{}'. Select it and click Build Knowledge Base.",
                filename
            ),
            filename,
        }));
    }
    Err(bad_request("multipart body has no 'file' field"))
}

// ============ GET /files ============

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<String>,
    default_file: String,
}

async fn handle_files(State(state): State<AppState>) -> Result<Json<FilesResponse>, AppError> {
    let files = list_supported_files(&state.documents.data_dir)?;
    Ok(Json(FilesResponse {
        files,
        default_file: state.documents.default_file.clone(),
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    sources: usize,
    source_ids: Vec<usize>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let answer = state.kb.ask(&req.message).await?;
    Ok(Json(ChatResponse {
        answer: answer.text,
        sources: answer.sources_count,
        source_ids: answer.source_ids,
    }))
}
