//! Session-protected file browsing and mutation handlers. Each handler
//! resolves its logical path through the allowed roots before touching the
//! filesystem.

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::archive::{self, CompressionPolicy};
use crate::error::{AppError, AppResult};
use crate::fsops;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub only_dirs: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&q.path)?;
    let entries = fsops::list_dir(&abs, q.only_dirs)?;
    Ok(Json(json!({
        "status": "ok",
        "path": abs.to_string_lossy(),
        "entries": entries,
    })))
}

pub async fn roots(State(state): State<AppState>) -> Json<serde_json::Value> {
    let roots: Vec<String> = state
        .roots
        .roots()
        .iter()
        .map(|r| r.to_string_lossy().into_owned())
        .collect();
    Json(json!({"status": "ok", "roots": roots}))
}

#[derive(Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

/// Content-Disposition with an RFC 5987 fallback for non-ASCII names.
pub(crate) fn content_disposition(kind: &str, name: &str) -> HeaderValue {
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    let encoded = urlencoding::encode(name);
    HeaderValue::from_str(&format!(
        "{kind}; filename=\"{ascii}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Stream a single file without loading it into memory.
pub(crate) async fn stream_file(abs: &Path, inline: bool) -> AppResult<Response> {
    let file = tokio::fs::File::open(abs).await?;
    let meta = file.metadata().await?;
    if meta.is_dir() {
        return Err(AppError::user("is_directory", "Path is a directory"));
    }
    let name = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let mime = mime_guess::from_path(abs).first_or_octet_stream();
    let kind = if inline { "inline" } else { "attachment" };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(kind, &name));

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

pub async fn file_attachment(
    State(state): State<AppState>,
    Query(q): Query<PathQuery>,
) -> AppResult<Response> {
    let abs = state.resolve_allowed(&q.path)?;
    stream_file(&abs, false).await
}

pub async fn file_inline(
    State(state): State<AppState>,
    Query(q): Query<PathQuery>,
) -> AppResult<Response> {
    let abs = state.resolve_allowed(&q.path)?;
    stream_file(&abs, true).await
}

pub async fn read(
    State(state): State<AppState>,
    Query(q): Query<PathQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&q.path)?;
    let content = fsops::read_text(&abs)?;
    Ok(Json(json!({"status": "ok", "content": content})))
}

#[derive(Deserialize)]
pub struct SavePayload {
    pub path: String,
    pub content: String,
}

pub async fn save(
    State(state): State<AppState>,
    Json(payload): Json<SavePayload>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&payload.path)?;
    fsops::save_text(&abs, &payload.content)?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct SearchPayload {
    #[serde(default)]
    pub path: String,
    pub query: String,
    #[serde(default = "default_search_depth")]
    pub max_depth: usize,
}

fn default_search_depth() -> usize {
    10
}

pub async fn search(
    State(state): State<AppState>,
    Json(payload): Json<SearchPayload>,
) -> AppResult<Json<serde_json::Value>> {
    if payload.query.trim().is_empty() {
        return Err(AppError::user("empty_query", "Search query is empty"));
    }
    let abs = state.resolve_allowed(&payload.path)?;
    let results = fsops::search(&abs, &payload.query, payload.max_depth)?;
    Ok(Json(json!({"status": "ok", "results": results})))
}

/// Multipart upload into the directory named by `?path=`. An optional
/// `rel_path` field before each file places it in a subdirectory; paths that
/// would escape the destination are rejected.
pub async fn upload(
    State(state): State<AppState>,
    Query(q): Query<PathQuery>,
    mut multipart: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    let dest = state.resolve_allowed(&q.path)?;
    if !dest.is_dir() {
        return Err(AppError::not_found("dir_not_found", "Destination is not a directory"));
    }
    let mut saved: Vec<String> = Vec::new();
    let mut pending_rel: Option<String> = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::user("bad_multipart", &e.to_string()))?
    {
        match field.name() {
            Some("rel_path") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::user("bad_multipart", &e.to_string()))?;
                pending_rel = Some(text);
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(|n| n.to_string())
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| AppError::user("missing_filename", "File has no name"))?;
                let target =
                    fsops::upload_target(&dest, pending_rel.take().as_deref(), &filename)?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let mut out = tokio::fs::File::create(&target).await?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| AppError::user("bad_multipart", &e.to_string()))?
                {
                    out.write_all(&chunk).await?;
                }
                out.flush().await?;
                saved.push(target.to_string_lossy().into_owned());
            }
            _ => {}
        }
    }
    if saved.is_empty() {
        return Err(AppError::user("no_files", "No files in upload"));
    }
    Ok(Json(json!({"status": "ok", "saved": saved})))
}

#[derive(Deserialize)]
pub struct PathPayload {
    pub path: String,
}

pub async fn mkdir(
    State(state): State<AppState>,
    Json(payload): Json<PathPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&payload.path)?;
    fsops::mkdir(&abs)?;
    Ok(Json(json!({"status": "ok", "path": abs.to_string_lossy()})))
}

pub async fn delete_path(
    State(state): State<AppState>,
    Json(payload): Json<PathPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&payload.path)?;
    fsops::delete(&abs)?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct RenamePayload {
    pub path: String,
    pub new_name: String,
}

pub async fn rename(
    State(state): State<AppState>,
    Json(payload): Json<RenamePayload>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&payload.path)?;
    let renamed = fsops::rename(&state.roots, &abs, &payload.new_name)?;
    Ok(Json(json!({"status": "ok", "path": renamed.to_string_lossy()})))
}

#[derive(Deserialize)]
pub struct TransferPayload {
    pub src: String,
    pub dst: String,
}

pub async fn move_path(
    State(state): State<AppState>,
    Json(payload): Json<TransferPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let result = fsops::move_path(&state.roots, &state.undo, &payload.src, &payload.dst)?;
    Ok(Json(json!({
        "status": "ok",
        "path": result.path,
        "skipped": result.skipped,
        "undo_token": result.undo_token,
    })))
}

pub async fn copy(
    State(state): State<AppState>,
    Json(payload): Json<TransferPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let target = fsops::copy_path(&state.roots, &payload.src, &payload.dst)?;
    Ok(Json(json!({"status": "ok", "path": target.to_string_lossy()})))
}

#[derive(Deserialize)]
pub struct UndoPayload {
    pub token: String,
}

pub async fn undo(
    State(state): State<AppState>,
    Json(payload): Json<UndoPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let restored = fsops::undo_move(&state.roots, &state.undo, &payload.token)?;
    Ok(Json(json!({"status": "ok", "path": restored.to_string_lossy()})))
}

pub async fn stat(
    State(state): State<AppState>,
    Query(q): Query<PathQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&q.path)?;
    let meta = fsops::build_metadata(&abs)?;
    Ok(Json(json!({"status": "ok", "meta": meta})))
}

#[derive(Deserialize)]
pub struct UpdateMetaPayload {
    pub path: String,
    pub modified: Option<f64>,
    pub readonly: Option<bool>,
}

pub async fn update_meta(
    State(state): State<AppState>,
    Json(payload): Json<UpdateMetaPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&payload.path)?;
    let meta = fsops::update_meta(&abs, payload.modified, payload.readonly)?;
    Ok(Json(json!({"status": "ok", "meta": meta})))
}

/// Turn a planned archive into a chunked ZIP response.
pub(crate) fn zip_response(job: archive::ArchiveJob, policy: CompressionPolicy) -> Response {
    let filename = job.filename.clone();
    let rx = archive::spawn_zip_stream(job, policy);
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<Bytes, std::io::Error>(Bytes::from(chunk)), rx))
    });
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition("attachment", &filename),
    );
    (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
}

#[derive(Deserialize)]
pub struct ZipQuery {
    pub path: String,
    #[serde(default)]
    pub fast: bool,
}

fn policy_for(fast: bool) -> CompressionPolicy {
    if fast {
        CompressionPolicy::Fast
    } else {
        CompressionPolicy::Deflated
    }
}

pub async fn zip_single(
    State(state): State<AppState>,
    Query(q): Query<ZipQuery>,
) -> AppResult<Response> {
    let abs = state.resolve_allowed(&q.path)?;
    let job = archive::plan_single(&abs)?;
    Ok(zip_response(job, policy_for(q.fast)))
}

#[derive(Deserialize)]
pub struct ZipMultiplePayload {
    pub paths: Vec<String>,
    #[serde(default)]
    pub fast: bool,
    pub filename: Option<String>,
}

pub async fn zip_multiple(
    State(state): State<AppState>,
    Json(payload): Json<ZipMultiplePayload>,
) -> AppResult<Response> {
    if payload.paths.is_empty() {
        return Err(AppError::user("no_paths", "No paths selected"));
    }
    let mut sources = Vec::with_capacity(payload.paths.len());
    for p in &payload.paths {
        sources.push(state.resolve_allowed(p)?);
    }
    let filename = payload
        .filename
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .unwrap_or("selected_files.zip");
    let job = archive::plan_multiple(&sources, filename)?;
    Ok(zip_response(job, policy_for(payload.fast)))
}

pub async fn pins_list(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let pins = state.shares.list_pins()?;
    Ok(Json(json!({"status": "ok", "pins": pins})))
}

pub async fn pins_add(
    State(state): State<AppState>,
    Json(payload): Json<PathPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&payload.path)?;
    state.shares.add_pin(&abs.to_string_lossy())?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn pins_remove(
    State(state): State<AppState>,
    Query(q): Query<PathQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&q.path)?;
    state.shares.remove_pin_by_path(&abs.to_string_lossy())?;
    Ok(Json(json!({"status": "ok"})))
}
