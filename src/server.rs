//! HTTP server for document upload and question answering.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Multipart upload (`file`, optional `file_id`); `?append=true` adds to the session's collection |
//! | `POST` | `/search` | `{"text": ..., "collection_id": ...}` → `{"results": answer}` |
//! | `POST` | `/extract_text` | Multipart PDF → sentence preview, nothing stored |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Sessions are selected with the `x-session-id` header (default `"default"`).
//!
//! # Error Contract
//!
//! ```json
//! { "error": "File type not allowed. Allowed types: txt, pdf", "code": "validation_error" }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::RagError;
use crate::ingest::{IngestMode, IngestOptions};
use crate::models::{Document, ExtractPreview, IngestSummary};
use crate::registry::DEFAULT_SESSION;
use crate::service::RagService;

/// Header selecting the caller's session.
pub const SESSION_HEADER: &str = "x-session-id";

/// Multipart framing allowance on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    service: Arc<RagService>,
}

/// Builds the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(service: Arc<RagService>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(handle_upload))
        .route("/search", post(handle_search))
        .route("/extract_text", post(handle_extract_text))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { service })
}

/// Starts the HTTP server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(RagService::from_config(config)?);
    let app = router(service, config.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "docqa server listening");
    println!("docqa server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Pipeline error rendered as a JSON response.
struct AppError(RagError);

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
        } else {
            warn!(code = self.0.code(), error = %self.0, "request rejected");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn session_of(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

/// Fields of an upload form.
struct UploadForm {
    document: Option<Document>,
    file_id: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm {
        document: None,
        file_id: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RagError::validation(format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| RagError::validation(format!("Failed to read file: {}", e)))?;
                form.document = Some(Document::new(filename, bytes.to_vec()));
            }
            "file_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| RagError::validation(format!("Failed to read file_id: {}", e)))?;
                form.file_id = Some(text);
            }
            _ => {}
        }
    }

    Ok(form)
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

// ============ POST /upload ============

#[derive(Deserialize, Default)]
struct UploadParams {
    #[serde(default)]
    append: bool,
}

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    #[serde(flatten)]
    summary: IngestSummary,
}

async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let form = read_upload(multipart).await?;
    let document = form
        .document
        .ok_or_else(|| RagError::validation("No file part in the request"))?;

    let options = IngestOptions {
        session: session_of(&headers),
        file_id: form.file_id,
        mode: if params.append {
            IngestMode::Append
        } else {
            IngestMode::Fresh
        },
    };

    let summary = state.service.ingest(document, &options).await?;
    Ok(Json(UploadResponse {
        message: "File processed and uploaded successfully".to_string(),
        summary,
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    collection_id: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: String,
    collection_id: String,
}

async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(request) =
        payload.map_err(|e| RagError::validation(format!("Invalid request body: {}", e)))?;

    let answer = state
        .service
        .query(
            &request.text,
            request.collection_id.as_deref(),
            &session_of(&headers),
        )
        .await?;

    Ok(Json(SearchResponse {
        results: answer.text,
        collection_id: answer.collection_id,
    }))
}

// ============ POST /extract_text ============

async fn handle_extract_text(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ExtractPreview>, AppError> {
    let form = read_upload(multipart).await?;
    let document = form
        .document
        .ok_or_else(|| RagError::validation("No file part in the request"))?;

    let preview = state.service.extract_only(document).await?;
    Ok(Json(preview))
}
