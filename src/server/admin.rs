//! Admin inventory endpoints: share and pin listings, deletion, and expired
//! share cleanup. Session-protected like the rest of the /api surface.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::server::AppState;

pub async fn summary(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let counts = state.shares.counts()?;
    Ok(Json(json!({
        "status": "ok",
        "shares": counts.shares,
        "pins": counts.pins,
        "pending_undo": state.undo.len(),
        "roots": state.roots.roots().len(),
        "auth_enabled": state.auth.enabled(),
    })))
}

pub async fn shares_list(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let shares = state.shares.list()?;
    Ok(Json(json!({"status": "ok", "shares": shares})))
}

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

pub async fn share_delete(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> AppResult<Json<serde_json::Value>> {
    if state.shares.delete(&q.token)? {
        Ok(Json(json!({"status": "ok"})))
    } else {
        Err(AppError::not_found("share_not_found", "Share not found"))
    }
}

pub async fn shares_cleanup(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let removed = state.shares.cleanup_expired()?;
    Ok(Json(json!({"status": "ok", "removed": removed})))
}

pub async fn pins_list(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let pins = state.shares.list_pins()?;
    Ok(Json(json!({"status": "ok", "pins": pins})))
}

#[derive(Deserialize)]
pub struct PinQuery {
    pub id: i64,
}

pub async fn pin_delete(
    State(state): State<AppState>,
    Query(q): Query<PinQuery>,
) -> AppResult<Json<serde_json::Value>> {
    state.shares.remove_pin_by_id(q.id)?;
    Ok(Json(json!({"status": "ok"})))
}
