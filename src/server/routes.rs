//! HTTP handlers for the UI and the session API.

use super::state::AppState;
use crate::convert::convert_batch;
use crate::error::Doc2MdError;
use crate::output::UploadedFile;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("index.html");

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/sessions/{id}/api-key", put(set_api_key))
        // Size is enforced per file while streaming, so one oversize upload
        // fails alone instead of the whole request.
        .route(
            "/api/sessions/{id}/convert",
            post(convert).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/sessions/{id}/results", get(results))
        .route("/api/sessions/{id}/results/{index}", get(download_result))
        .route("/api/sessions/{id}/combined", get(download_combined))
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Error returned by handlers, rendered as `{ "error": "..." }`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<Doc2MdError> for ApiError {
    fn from(e: Doc2MdError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

fn session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("unknown session '{raw}'")))
}

fn unknown_session(id: &Uuid) -> ApiError {
    ApiError::NotFound(format!("unknown session '{id}'"))
}

// ── Pages ────────────────────────────────────────────────────────────────

/// GET /: the single-page UI.
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /healthz: liveness.
async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Sessions ─────────────────────────────────────────────────────────────

/// POST /api/sessions: start a session.
async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let id = state.sessions.create();
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "session_id": id,
            "max_upload_bytes": state.config.max_file_size,
            "env_captioning": state.config.caption_from_env && env_key_present(),
        })),
    )
}

fn env_key_present() -> bool {
    ["OPENAI_API_KEY", "EDGEQUAKE_LLM_PROVIDER"]
        .iter()
        .any(|v| std::env::var(v).map(|s| !s.trim().is_empty()).unwrap_or(false))
}

/// DELETE /api/sessions/{id}: drop results and key.
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = session_id(&id)?;
    if state.sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(unknown_session(&id))
    }
}

#[derive(Debug, Deserialize)]
struct ApiKeyBody {
    #[serde(default)]
    api_key: Option<String>,
}

/// PUT /api/sessions/{id}/api-key: set or clear the session key.
async fn set_api_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ApiKeyBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = session_id(&id)?;
    if !state.sessions.set_api_key(&id, body.api_key.as_deref()) {
        return Err(unknown_session(&id));
    }
    let has_key = state
        .sessions
        .touch(&id)
        .map(|s| s.api_key.is_some())
        .unwrap_or(false);
    Ok(Json(serde_json::json!({ "has_api_key": has_key })))
}

// ── Conversion ───────────────────────────────────────────────────────────

/// POST /api/sessions/{id}/convert: multipart `files` (+ optional `api_key`).
async fn convert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let id = session_id(&id)?;
    let session = state.sessions.touch(&id).ok_or_else(|| unknown_session(&id))?;

    let form = read_upload_form(multipart, state.config.max_file_size).await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("no files uploaded".into()));
    }

    if let Some(key) = form.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        state.sessions.set_api_key(&id, Some(key));
    }
    let key = form
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .or(session.api_key.as_deref());
    let config = state.config.with_api_key(key);

    info!("Session {}: converting {} files", id, form.files.len());
    let report = Arc::new(convert_batch(form.files, &config).await?);
    if !state.sessions.store_report(&id, Arc::clone(&report)) {
        warn!("Session {} ended during conversion", id);
    }
    Ok(Json(report.as_ref()).into_response())
}

struct UploadForm {
    files: Vec<UploadedFile>,
    api_key: Option<String>,
}

/// Read the multipart body, keeping at most `limit` bytes per file.
///
/// A file over the limit is drained but not buffered; its true size is kept
/// so intake can reject it with an accurate message.
async fn read_upload_form(mut multipart: Multipart, limit: u64) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm {
        files: Vec::new(),
        api_key: None,
    };

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("api_key") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("invalid api_key field: {e}")))?;
                form.api_key = Some(text);
            }
            Some("files") | Some("files[]") => {
                // Browsers send an empty part when nothing was picked.
                let Some(name) = field.file_name().filter(|n| !n.is_empty()).map(str::to_string)
                else {
                    continue;
                };
                let content_type = field.content_type().map(str::to_string);

                let mut bytes = Vec::new();
                let mut size = 0u64;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("upload of '{name}' failed: {e}")))?
                {
                    size += chunk.len() as u64;
                    if size <= limit {
                        bytes.extend_from_slice(&chunk);
                    } else if !bytes.is_empty() {
                        bytes = Vec::new();
                    }
                }

                form.files.push(if size > limit {
                    UploadedFile::truncated(name, content_type, size)
                } else {
                    UploadedFile {
                        content_type,
                        ..UploadedFile::new(name, bytes)
                    }
                });
            }
            _ => {}
        }
    }
    Ok(form)
}

// ── Results ──────────────────────────────────────────────────────────────

/// GET /api/sessions/{id}/results: the last report as JSON.
async fn results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = session_id(&id)?;
    let session = state.sessions.touch(&id).ok_or_else(|| unknown_session(&id))?;
    let report = session
        .report
        .ok_or_else(|| ApiError::NotFound("no conversion in this session yet".into()))?;
    Ok(Json(report.as_ref()).into_response())
}

/// GET /api/sessions/{id}/results/{index}: one result as a `.md` download.
async fn download_result(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    let id = session_id(&id)?;
    let session = state.sessions.touch(&id).ok_or_else(|| unknown_session(&id))?;
    let result = session
        .report
        .as_ref()
        .and_then(|r| r.get(index))
        .filter(|r| r.is_success())
        .ok_or_else(|| ApiError::NotFound(format!("no converted file at index {index}")))?;
    Ok(markdown_download(&result.download_name, result.markdown.clone()))
}

/// GET /api/sessions/{id}/combined: every successful output in one file.
async fn download_combined(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = session_id(&id)?;
    let session = state.sessions.touch(&id).ok_or_else(|| unknown_session(&id))?;
    let report = session
        .report
        .filter(|r| r.successes().next().is_some())
        .ok_or_else(|| ApiError::NotFound("nothing has been converted yet".into()))?;
    let body = report.combined_markdown(&state.config.file_separator);
    Ok(markdown_download(&report.combined_file_name(), body))
}

fn markdown_download(file_name: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(file_name)),
        ],
        body,
    )
        .into_response()
}

/// `attachment` header with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded: String = file_name
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect();
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_disposition_escapes_non_ascii() {
        let h = content_disposition("résumé \"v2\".md");
        assert!(h.starts_with("attachment; filename=\"r_sum_ _v2_.md\""));
        assert!(h.ends_with("filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.md"));
    }

    #[test]
    fn bad_session_ids_are_not_found() {
        assert!(matches!(session_id("nope"), Err(ApiError::NotFound(_))));
    }
}
