//! Token-addressed share surface. These routes are mounted outside the
//! session check: the token is the whole credential, optionally combined with
//! a share password. All paths here are relative to the share root.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::archive::{self, CompressionPolicy};
use crate::error::{AppError, AppResult};
use crate::fsops;
use crate::server::files::{stream_file, zip_response};
use crate::server::AppState;
use crate::shares::{ShareOptions, ShareRecord};

#[derive(Deserialize)]
pub struct CreatePayload {
    pub path: String,
    #[serde(default = "default_true")]
    pub readonly: bool,
    #[serde(default = "default_true")]
    pub allow_download: bool,
    #[serde(default)]
    pub allow_edit: bool,
    pub password: Option<String>,
    pub expires_hours: Option<f64>,
}

fn default_true() -> bool {
    true
}

/// Create a share rooted at an allowed path. Session-protected; the returned
/// token is the credential handed to recipients.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreatePayload>,
) -> AppResult<Json<serde_json::Value>> {
    let abs = state.resolve_allowed(&payload.path)?;
    if !abs.exists() {
        return Err(AppError::not_found("not_found", "Path not found"));
    }
    let record = state.shares.create(
        &abs,
        ShareOptions {
            readonly: payload.readonly,
            allow_download: payload.allow_download,
            allow_edit: payload.allow_edit,
            password: payload.password,
            expires_hours: payload.expires_hours,
        },
    )?;
    Ok(Json(json!({"status": "ok", "share": record})))
}

#[derive(Deserialize)]
pub struct ShareQuery {
    pub token: String,
    #[serde(default)]
    pub path: String,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

/// Public share metadata; enough for a client to know whether to prompt for a
/// password. Never includes the hash.
pub async fn info(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let record = state.shares.get_live(&q.token)?;
    Ok(Json(json!({
        "status": "ok",
        "readonly": record.readonly,
        "allow_download": record.allow_download,
        "allow_edit": record.allow_edit,
        "password_protected": record.password_protected(),
        "expires_at": record.expires_at,
        "name": record.root.file_name().map(|n| n.to_string_lossy().into_owned()),
        "is_dir": record.root.is_dir(),
    })))
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ShareQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let (_, abs) = state
        .shares
        .resolve(&q.token, &q.path, q.password.as_deref())?;
    if abs.is_dir() {
        let entries = fsops::list_dir(&abs, false)?;
        Ok(Json(json!({"status": "ok", "entries": entries})))
    } else {
        // a share rooted at a single file lists as one row, same shape as a
        // directory listing
        let meta = fsops::build_metadata(&abs)?;
        let entry = fsops::EntryMeta {
            name: meta.name,
            path: meta.path,
            is_dir: meta.is_dir,
            size: meta.size,
            modified: meta.modified,
        };
        Ok(Json(json!({"status": "ok", "entries": [entry]})))
    }
}

#[derive(Deserialize)]
pub struct ShareFileQuery {
    pub token: String,
    #[serde(default)]
    pub path: String,
    pub password: Option<String>,
    #[serde(default)]
    pub download: bool,
}

pub async fn file(
    State(state): State<AppState>,
    Query(q): Query<ShareFileQuery>,
) -> AppResult<Response> {
    let (record, abs) = state
        .shares
        .resolve(&q.token, &q.path, q.password.as_deref())?;
    if q.download && !record.allow_download {
        return Err(AppError::forbidden(
            "share_no_download",
            "Downloads are disabled for this share",
        ));
    }
    stream_file(&abs, !q.download).await
}

pub async fn read(
    State(state): State<AppState>,
    Query(q): Query<ShareQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let (_, abs) = state
        .shares
        .resolve(&q.token, &q.path, q.password.as_deref())?;
    let content = fsops::read_text(&abs)?;
    Ok(Json(json!({"status": "ok", "content": content})))
}

pub async fn stat(
    State(state): State<AppState>,
    Query(q): Query<ShareQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let (_, abs) = state
        .shares
        .resolve(&q.token, &q.path, q.password.as_deref())?;
    let meta = fsops::build_metadata(&abs)?;
    Ok(Json(json!({"status": "ok", "meta": meta})))
}

fn require_edit(record: &ShareRecord) -> AppResult<()> {
    if record.allow_edit {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "share_readonly",
            "Editing is disabled for this share",
        ))
    }
}

#[derive(Deserialize)]
pub struct ShareSavePayload {
    pub token: String,
    pub path: String,
    pub content: String,
    pub password: Option<String>,
}

pub async fn save(
    State(state): State<AppState>,
    Json(payload): Json<ShareSavePayload>,
) -> AppResult<Json<serde_json::Value>> {
    let (record, abs) =
        state
            .shares
            .resolve(&payload.token, &payload.path, payload.password.as_deref())?;
    require_edit(&record)?;
    fsops::save_text(&abs, &payload.content)?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct ShareUpdateMetaPayload {
    pub token: String,
    pub path: String,
    pub password: Option<String>,
    pub modified: Option<f64>,
    pub readonly: Option<bool>,
}

pub async fn update_meta(
    State(state): State<AppState>,
    Json(payload): Json<ShareUpdateMetaPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let (record, abs) =
        state
            .shares
            .resolve(&payload.token, &payload.path, payload.password.as_deref())?;
    require_edit(&record)?;
    let meta = fsops::update_meta(&abs, payload.modified, payload.readonly)?;
    Ok(Json(json!({"status": "ok", "meta": meta})))
}

#[derive(Deserialize)]
pub struct ShareZipPayload {
    pub token: String,
    pub paths: Vec<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub fast: bool,
}

pub async fn zip_multiple(
    State(state): State<AppState>,
    Json(payload): Json<ShareZipPayload>,
) -> AppResult<Response> {
    if payload.paths.is_empty() {
        return Err(AppError::user("no_paths", "No paths selected"));
    }
    let mut sources = Vec::with_capacity(payload.paths.len());
    let mut record = None;
    for rel in &payload.paths {
        let (rec, abs) =
            state
                .shares
                .resolve(&payload.token, rel, payload.password.as_deref())?;
        record = Some(rec);
        sources.push(abs);
    }
    if let Some(record) = record {
        if !record.allow_download {
            return Err(AppError::forbidden(
                "share_no_download",
                "Downloads are disabled for this share",
            ));
        }
    }
    let job = archive::plan_multiple(&sources, "selected_files.zip")?;
    let policy = if payload.fast {
        CompressionPolicy::Fast
    } else {
        CompressionPolicy::Deflated
    };
    Ok(zip_response(job, policy))
}
