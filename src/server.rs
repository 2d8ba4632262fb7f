//! JSON HTTP API: uploads, job submission, progress polling and artifacts.

use crate::files::{self, OutputFile};
use crate::job::{JobDispatcher, JobError, JobRequest, ProgressReader, ProgressSnapshot};
use crate::paths::WorkDirs;
use crate::transcription::{list_installed_model_names, Device, MODEL_SOURCES};
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use http::{header, StatusCode};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<JobDispatcher>,
    pub reader: ProgressReader,
    pub dirs: WorkDirs,
    pub models_dir: PathBuf,
    /// Target for submissions asking for `auto`, detected once at start-up.
    pub auto_device: Device,
}

impl AppState {
    pub fn new(dispatcher: JobDispatcher, dirs: WorkDirs, models_dir: PathBuf, auto_device: Device) -> Self {
        let reader = dispatcher.reader();
        Self {
            dispatcher: Arc::new(dispatcher),
            reader,
            dirs,
            models_dir,
            auto_device,
        }
    }
}

/// Error body `{"error": message}` with a status derived from the cause.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        let status = match e {
            JobError::JobInProgress => StatusCode::CONFLICT,
            JobError::InputNotFound(_) => StatusCode::NOT_FOUND,
            JobError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct PageState {
    progress: ProgressSnapshot,
    pending_files: Vec<String>,
    output_files: Vec<OutputFile>,
}

#[derive(Debug, Deserialize)]
struct TranscribeBody {
    #[serde(default)]
    selected_file: String,
    model: Option<String>,
    language: Option<String>,
    compute_type: Option<String>,
    device: Option<String>,
    #[serde(default)]
    reload_model: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/state", get(page_state))
        .route("/api/progress", get(progress))
        .route("/api/models", get(models))
        .route("/api/upload", post(upload))
        .route("/api/transcribe", post(transcribe))
        .route("/api/download/:name", get(download))
        .route("/api/outputs/:name", delete(delete_output))
        .route("/api/pending/:name", delete(delete_pending))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: &str) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;
    info!("[server] listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("[server] shutting down");
        })
        .await
        .map_err(|e| format!("Server error: {}", e))
}

async fn page_state(State(state): State<AppState>) -> ApiResult<Json<PageState>> {
    let progress = state.reader.page_view();
    let pending_files = files::list_pending(&state.dirs).map_err(ApiError::internal)?;
    let output_files = files::list_outputs(&state.dirs).map_err(ApiError::internal)?;
    Ok(Json(PageState {
        progress,
        pending_files,
        output_files,
    }))
}

async fn progress(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    Json(state.reader.snapshot())
}

async fn models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let available: Vec<&str> = MODEL_SOURCES.iter().map(|(id, _)| *id).collect();
    Json(json!({
        "available": available,
        "installed": list_installed_model_names(&state.models_dir),
    }))
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<serde_json::Value>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let raw_name = field.file_name().unwrap_or_default().to_string();
        if raw_name.is_empty() {
            return Err(ApiError::bad_request("No file selected"));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?;
        let name = files::save_upload(&state.dirs, &raw_name, &bytes).map_err(|e| {
            warn!("[upload] rejected {:?}: {}", raw_name, e);
            ApiError::bad_request(e)
        })?;
        info!("[upload] stored {} ({} bytes)", name, bytes.len());
        return Ok(Json(json!({ "file": name })));
    }
    Err(ApiError::bad_request("No file selected"))
}

async fn transcribe(
    State(state): State<AppState>,
    Json(body): Json<TranscribeBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let request = JobRequest::from_options(
        &body.selected_file,
        body.model.as_deref(),
        body.language.as_deref(),
        body.device.as_deref(),
        state.auto_device,
        body.compute_type.as_deref(),
        body.reload_model,
    )?;
    let job = state.dispatcher.submit(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "job_id": job.id.to_string() })),
    ))
}

async fn download(State(state): State<AppState>, UrlPath(name): UrlPath<String>) -> ApiResult<Response> {
    if !files::is_plain_file_name(&name) {
        return Err(ApiError::bad_request(format!("Invalid file name: {}", name)));
    }
    let path = state.dirs.output.join(&name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("File {} was not found", name)))
        }
        Err(e) => return Err(ApiError::internal(format!("Failed to read {}: {}", name, e))),
    };
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&name)),
        ],
        bytes,
    )
        .into_response())
}

/// `attachment` header with an ASCII fallback name and the UTF-8 name
/// percent-encoded in `filename*`.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    let encoded: String = name
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'~') {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect();
    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", fallback, encoded)
}

async fn delete_output(State(state): State<AppState>, UrlPath(name): UrlPath<String>) -> ApiResult<StatusCode> {
    remove(&state.dirs.output, &name)
}

async fn delete_pending(State(state): State<AppState>, UrlPath(name): UrlPath<String>) -> ApiResult<StatusCode> {
    if state.reader.in_flight_file().as_deref() == Some(name.as_str()) {
        return Err(ApiError::conflict(format!("File {} is being transcribed", name)));
    }
    remove(&state.dirs.upload, &name)
}

fn remove(dir: &std::path::Path, name: &str) -> ApiResult<StatusCode> {
    if !files::is_plain_file_name(name) {
        return Err(ApiError::bad_request(format!("Invalid file name: {}", name)));
    }
    match files::delete_file(dir, name) {
        Ok(true) => {
            info!("[files] deleted {}", dir.join(name).display());
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => Err(ApiError::not_found(format!("File {} was not found", name))),
        Err(e) => Err(ApiError::internal(e)),
    }
}
