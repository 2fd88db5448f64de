//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/ask` | Answer a question over both corpora |
//! | `POST` | `/api/feedback` | Dispute an answer in a session transcript |
//! | `POST` | `/api/admin/upload` | Multipart upload of one or more documents |
//! | `GET`  | `/api/admin/documents?search=` | Documents grouped by lineage |
//! | `GET`  | `/api/admin/documents/group/{group}` | One lineage |
//! | `PUT`  | `/api/admin/documents/{id}/set-latest` | Manual latest override |
//! | `GET`  | `/api/admin/feedbacks?status=` | Corrections plus status counts |
//! | `POST` | `/api/admin/feedbacks/{id}/approve` | Approve and ingest a correction |
//! | `POST` | `/api/admin/feedbacks/{id}/reject` | Reject a correction with a reason |
//!
//! Upload bodies are capped at `[server].max_upload_bytes`; larger requests
//! get `413 payload_too_large`.
//!
//! Callers identify themselves with an `x-user-id` header. Verifying that
//! identity is left to whatever sits in front of this server, which is why
//! the default bind address is loopback only.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_state", "message": "corr_1 is already rejected; ..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `validation_error`, `bad_request` | 400 |
//! | `not_found` | 404 |
//! | `invalid_state` | 409 |
//! | `payload_too_large` | 413 |
//! | `external_service_failure` | 502 |
//! | `timeout` | 504 |
//! | `io_failure`, `internal` | 500 |

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::App;
use crate::corrections::CorrectionStats;
use crate::error::GatewayError;
use crate::generation::Answer;
use crate::ingest::{IngestReport, IngestTarget};
use crate::models::{Correction, CorrectionStatus, CorpusType, Document};
use crate::registry::DocumentGroup;

const USER_HEADER: &str = "x-user-id";

type AppState = Arc<App>;

/// Serve until the process is terminated.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let app = Arc::new(app);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "listening");
    println!("kbg listening on http://{}", bind_addr);
    axum::serve(listener, router(app)).await?;

    Ok(())
}

pub fn router(app: AppState) -> Router {
    let upload_limit = app.config.server.max_upload_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/ask", post(handle_ask))
        .route("/api/feedback", post(handle_feedback))
        .route(
            "/api/admin/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/admin/documents", get(handle_documents))
        .route("/api/admin/documents/group/{group}", get(handle_group))
        .route("/api/admin/documents/{id}/set-latest", put(handle_set_latest))
        .route("/api/admin/feedbacks", get(handle_feedbacks))
        .route("/api/admin/feedbacks/{id}/approve", post(handle_approve))
        .route("/api/admin/feedbacks/{id}/reject", post(handle_reject))
        .layer(cors)
        .with_state(app)
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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let status = match &err {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::InvalidState { .. } => StatusCode::CONFLICT,
            GatewayError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Io { .. } | GatewayError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "bad_request"
    };
    AppError {
        status,
        code: code.to_string(),
        message: err.body_text(),
    }
}

fn caller(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| bad_request(format!("missing {} header", USER_HEADER)))
}

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

// ============ POST /api/ask ============

#[derive(Deserialize)]
struct AskRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default = "default_true")]
    include_corrections: bool,
}

fn default_true() -> bool {
    true
}

async fn handle_ask(
    State(app): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    let answer = app
        .gateway
        .ask(&req.message, req.session_id.as_deref(), req.include_corrections)
        .await?;
    Ok(Json(answer))
}

// ============ POST /api/feedback ============

#[derive(Deserialize)]
struct FeedbackRequest {
    session_id: String,
    message_index: usize,
    user_feedback: String,
}

#[derive(Serialize)]
struct FeedbackResponse {
    correction_id: String,
    correction: Correction,
}

async fn handle_feedback(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let user = caller(&headers)?;
    let correction = app
        .corrections
        .submit_feedback(&req.session_id, req.message_index, &req.user_feedback, &user)
        .await?;
    Ok(Json(FeedbackResponse {
        correction_id: correction.id.clone(),
        correction,
    }))
}

// ============ POST /api/admin/upload ============

#[derive(Serialize)]
struct UploadResponse {
    ingested: usize,
    total: usize,
    reports: Vec<IngestReport>,
}

/// Multipart fields: one or more `file` parts, optional `corpus`
/// (`primary` | `correction`) and `group` text parts.
async fn handle_upload(
    State(app): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let user = caller(&headers)?;

    let mut corpus_type = CorpusType::Primary;
    let mut group: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "corpus" => {
                let text = field.text().await.map_err(multipart_error)?;
                corpus_type = text.trim().parse()?;
            }
            "group" => {
                let text = field.text().await.map_err(multipart_error)?;
                group = Some(text);
            }
            "file" => {
                // Keep only the final component of whatever the client sent.
                let file_name = field
                    .file_name()
                    .and_then(|n| FsPath::new(n).file_name())
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| bad_request("file part without a file name"))?;
                let bytes = field.bytes().await.map_err(multipart_error)?;
                files.push((file_name, bytes.to_vec()));
            }
            other => return Err(bad_request(format!("unexpected field: {}", other))),
        }
    }

    if files.is_empty() {
        return Err(bad_request("no file parts in upload"));
    }

    let upload_dir = app.config.storage.data_dir.join("uploads");
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|e| GatewayError::io(&upload_dir, e))?;

    let target = IngestTarget {
        corpus_type,
        explicit_group: group,
        uploaded_by: Some(user),
    };

    let mut reports = Vec::with_capacity(files.len());
    for (file_name, bytes) in files {
        reports.push(stage_and_ingest(&app, &upload_dir, &file_name, &bytes, &target).await?);
    }

    let ingested = reports.iter().filter(|r| r.is_ingested()).count();
    Ok(Json(UploadResponse {
        ingested,
        total: reports.len(),
        reports,
    }))
}

/// Ingest from a private staging directory and keep the bytes under
/// `uploads/<file_name>` only if the file was actually ingested, so a
/// skipped duplicate never replaces the copy of the registered document.
async fn stage_and_ingest(
    app: &App,
    upload_dir: &FsPath,
    file_name: &str,
    bytes: &[u8],
    target: &IngestTarget,
) -> Result<IngestReport, GatewayError> {
    let staging = upload_dir
        .join(".staging")
        .join(Uuid::new_v4().simple().to_string());
    tokio::fs::create_dir_all(&staging)
        .await
        .map_err(|e| GatewayError::io(&staging, e))?;
    let staged = staging.join(file_name);
    tokio::fs::write(&staged, bytes)
        .await
        .map_err(|e| GatewayError::io(&staged, e))?;

    let report = app.ingestor.ingest_file(&staged, target).await;

    if report.is_ingested() {
        let kept = upload_dir.join(file_name);
        if let Err(e) = tokio::fs::rename(&staged, &kept).await {
            warn!(file = file_name, error = %e, "could not keep uploaded copy");
        }
    }
    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
        warn!(dir = %staging.display(), error = %e, "could not clean staging dir");
    }
    Ok(report)
}

// ============ Documents ============

#[derive(Deserialize)]
struct DocumentsQuery {
    #[serde(default)]
    search: Option<String>,
}

#[derive(Serialize)]
struct DocumentsResponse {
    groups: Vec<DocumentGroup>,
}

async fn handle_documents(
    State(app): State<AppState>,
    Query(q): Query<DocumentsQuery>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let groups = app.registry.list_groups(q.search.as_deref()).await?;
    Ok(Json(DocumentsResponse { groups }))
}

#[derive(Serialize)]
struct GroupResponse {
    version_group: String,
    documents: Vec<Document>,
}

async fn handle_group(
    State(app): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<GroupResponse>, AppError> {
    let documents = app.registry.group_documents(&group).await?;
    if documents.is_empty() {
        return Err(GatewayError::not_found("version group", group).into());
    }
    Ok(Json(GroupResponse {
        version_group: group,
        documents,
    }))
}

async fn handle_set_latest(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let user = caller(&headers)?;
    let doc = app.registry.set_latest_manually(&id).await?;
    info!(id = %id, user = %user, "latest overridden via api");
    Ok(Json(doc))
}

// ============ Corrections ============

#[derive(Deserialize)]
struct FeedbacksQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Serialize)]
struct FeedbacksResponse {
    corrections: Vec<Correction>,
    stats: CorrectionStats,
}

async fn handle_feedbacks(
    State(app): State<AppState>,
    Query(q): Query<FeedbacksQuery>,
) -> Result<Json<FeedbacksResponse>, AppError> {
    let status = q
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<CorrectionStatus>)
        .transpose()?;
    let corrections = app.corrections.list(status).await?;
    let stats = app.corrections.stats().await?;
    Ok(Json(FeedbacksResponse { corrections, stats }))
}

async fn handle_approve(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Correction>, AppError> {
    let reviewer = caller(&headers)?;
    Ok(Json(app.corrections.approve(&id, &reviewer).await?))
}

#[derive(Deserialize)]
struct RejectRequest {
    #[serde(default)]
    reason: String,
}

async fn handle_reject(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<Correction>, AppError> {
    let reviewer = caller(&headers)?;
    Ok(Json(app.corrections.reject(&id, &reviewer, &req.reason).await?))
}
