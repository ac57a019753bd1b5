use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Json, Multipart, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response as AxumResponse},
    routing::{get, post},
    Router,
};
use tokio_util::io::ReaderStream;

use crate::engine::{FileEngine, IncomingFile, Outcome, PREVIEW_LIMIT};
use crate::error::FsError;
use crate::listing::{breadcrumbs, ListOptions};
use crate::notify::{Broadcaster, ChannelBroadcaster};
use crate::protocol::*;
use crate::shared_text::SharedTextStore;
use crate::ws;

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

// ============================================================================
// App State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FileEngine>,
    pub broadcaster: ChannelBroadcaster,
    pub shared_text: Arc<SharedTextStore>,
    pub admin_password: Arc<str>,
}

impl AppState {
    /// Privilege comes from the admin password, sent either as
    /// `x-admin-password` or as a bearer token.
    pub fn is_privileged(&self, headers: &HeaderMap) -> bool {
        let supplied = headers
            .get(ADMIN_PASSWORD_HEADER)
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            });
        supplied.is_some_and(|p| p == &*self.admin_password)
    }

    fn publish<T>(&self, outcome: Outcome<T>) -> T {
        self.broadcaster.notify(outcome.notification);
        outcome.value
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/list", get(list_directory))
        .route("/api/download", get(download_file))
        .route("/api/download_folder", get(download_folder))
        .route("/api/preview", get(preview_file))
        .route(
            "/api/upload",
            post(upload_files).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/create_folder", post(create_folder))
        .route("/api/delete", post(delete_item))
        .route("/api/rename", post(rename_item))
        .route("/api/undo", get(undo_status).post(undo_last_action))
        .route("/api/shared_text", get(get_shared_text).post(update_shared_text))
        .route("/ws", get(ws::websocket_handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Runs blocking filesystem work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, FsError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string()))?
        .map_err(ApiError::from)
}

fn attachment(file_name: &str) -> HeaderValue {
    let ascii: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{ascii}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"download\""))
}

// ============================================================================
// Browsing
// ============================================================================

async fn list_directory(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DirectoryListing>, ApiError> {
    let engine = Arc::clone(&state.engine);
    let options = ListOptions {
        filter: query.filter,
        sort: query.sort,
        order: query.order,
    };
    let path = query.path;
    let (path, entries) = blocking(move || {
        let entries = engine.list(&path, &options)?;
        let normalized = engine.sandbox().resolve(&path)?.relative().to_string();
        Ok((normalized, entries))
    })
    .await?;

    Ok(Json(DirectoryListing {
        breadcrumbs: breadcrumbs(&path),
        path,
        entries,
        can_undo: state.engine.pending_undo().is_some(),
    }))
}

async fn download_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<AxumResponse, ApiError> {
    let engine = Arc::clone(&state.engine);
    let path = blocking(move || engine.download_path(&query.path)).await?;

    let file = tokio::fs::File::open(&path).await.map_err(FsError::from)?;
    let size = file.metadata().await.map_err(FsError::from)?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(header::CONTENT_DISPOSITION, attachment(&name));

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn download_folder(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<AxumResponse, ApiError> {
    let engine = Arc::clone(&state.engine);
    let archive = blocking(move || engine.build_archive(&query.path)).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(archive.size));
    headers.insert(header::CONTENT_DISPOSITION, attachment(&archive.file_name));

    let file = tokio::fs::File::from_std(archive.file);
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn preview_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Preview>, ApiError> {
    let engine = Arc::clone(&state.engine);
    let content = blocking(move || engine.preview(&query.path, PREVIEW_LIMIT)).await?;
    Ok(Json(Preview {
        success: true,
        content,
    }))
}

// ============================================================================
// Mutations
// ============================================================================

async fn upload_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResult>, ApiError> {
    let privileged = state.is_privileged(&headers);
    if !privileged {
        return Err(FsError::Forbidden.into());
    }

    let mut target = String::new();
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(ApiError::bad_request)? {
        match field.name() {
            Some("path") => target = field.text().await.map_err(ApiError::bad_request)?,
            Some("files") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let contents = field.bytes().await.map_err(ApiError::bad_request)?;
                files.push(IncomingFile {
                    name,
                    contents: contents.to_vec(),
                });
            }
            _ => {}
        }
    }
    if files.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "NO_FILES", "No files provided"));
    }

    let engine = Arc::clone(&state.engine);
    let outcome = blocking(move || engine.upload(privileged, &target, files)).await?;
    let report = state.publish(outcome);

    Ok(Json(UploadResult {
        success: report.failed.is_empty(),
        uploaded: report.uploaded,
        failed: report.failed,
    }))
}

async fn create_folder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NamedPathRequest>,
) -> Result<Json<OperationResult>, ApiError> {
    let privileged = state.is_privileged(&headers);
    let engine = Arc::clone(&state.engine);
    let outcome = blocking(move || engine.create_folder(privileged, &req.path, &req.name)).await?;
    let created = state.publish(outcome);

    Ok(Json(OperationResult {
        success: true,
        message: Some(format!("Folder created: {created}")),
        affected_paths: Some(vec![created]),
    }))
}

async fn delete_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PathRequest>,
) -> Result<Json<OperationResult>, ApiError> {
    let privileged = state.is_privileged(&headers);
    let engine = Arc::clone(&state.engine);
    let outcome = blocking(move || engine.delete(privileged, &req.path)).await?;
    let deleted = state.publish(outcome);

    Ok(Json(OperationResult {
        success: true,
        message: Some(format!("Deleted: {deleted}")),
        affected_paths: Some(vec![deleted]),
    }))
}

async fn rename_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NamedPathRequest>,
) -> Result<Json<OperationResult>, ApiError> {
    let privileged = state.is_privileged(&headers);
    let engine = Arc::clone(&state.engine);
    let old = req.path.clone();
    let outcome = blocking(move || engine.rename(privileged, &req.path, &req.name)).await?;
    let renamed = state.publish(outcome);

    Ok(Json(OperationResult {
        success: true,
        message: Some(format!("Renamed {old} to {renamed}")),
        affected_paths: Some(vec![old, renamed]),
    }))
}

async fn undo_status(State(state): State<AppState>) -> Json<UndoStatus> {
    let pending = state.engine.pending_undo();
    Json(UndoStatus {
        available: pending.is_some(),
        pending,
    })
}

async fn undo_last_action(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OperationResult>, ApiError> {
    let privileged = state.is_privileged(&headers);
    let engine = Arc::clone(&state.engine);
    let outcome = blocking(move || engine.undo(privileged)).await?;
    let directory = state.publish(outcome);

    Ok(Json(OperationResult {
        success: true,
        message: Some("Last operation undone".to_string()),
        affected_paths: Some(vec![directory]),
    }))
}

// ============================================================================
// Shared text
// ============================================================================

async fn get_shared_text(State(state): State<AppState>) -> Json<SharedText> {
    Json(SharedText {
        content: state.shared_text.get(),
    })
}

async fn update_shared_text(
    State(state): State<AppState>,
    Json(req): Json<SharedText>,
) -> Result<Json<OperationResult>, ApiError> {
    let store = Arc::clone(&state.shared_text);
    tokio::task::spawn_blocking(move || store.set(&req.content))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string()))?
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "PERSIST_FAILED", format!("{e:#}")))?;

    Ok(Json(OperationResult {
        success: true,
        message: None,
        affected_paths: None,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    fn bad_request(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", err.to_string())
    }
}

impl From<FsError> for ApiError {
    fn from(err: FsError) -> Self {
        let status = match &err {
            FsError::Rejected { .. }
            | FsError::NotADirectory(_)
            | FsError::NotAFile(_)
            | FsError::NotText(_)
            | FsError::NameRequired
            | FsError::NothingToUndo => StatusCode::BAD_REQUEST,
            FsError::NotFound(_) => StatusCode::NOT_FOUND,
            FsError::AlreadyExists(_) => StatusCode::CONFLICT,
            FsError::Forbidden => StatusCode::FORBIDDEN,
            FsError::WriteFailure { .. }
            | FsError::BackupFailure { .. }
            | FsError::Io(_)
            | FsError::UndoFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("{err}");
        }
        Self::new(status, err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> AxumResponse {
        let body = ErrorBody {
            error: ErrorInfo {
                code: self.code,
                message: self.message,
                details: None,
            },
        };

        (self.status, Json(body)).into_response()
    }
}
