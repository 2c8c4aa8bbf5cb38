//!
//! fileport HTTP server
//! --------------------
//! Axum-based HTTP API over the allowed filesystem roots.
//!
//! Responsibilities:
//! - Session management with a single-password cookie model.
//! - Login/logout endpoints backed by the `auth` module.
//! - File browsing and mutation endpoints delegating to `fsops`.
//! - Streaming single-file and ZIP downloads.
//! - Token-addressed share surface, mounted outside the session check.
//! - Admin endpoints for share/pin inventory and cleanup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{self, AuthState};
use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::paths::AllowedRoots;
use crate::shares::ShareStore;
use crate::undo::UndoLedger;

pub mod admin;
pub mod files;
pub mod share;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub roots: Arc<AllowedRoots>,
    pub shares: Arc<ShareStore>,
    pub undo: Arc<UndoLedger>,
    pub auth: Arc<AuthState>,
}

impl AppState {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let roots = AllowedRoots::new(settings.root_dirs.clone());
        let shares = ShareStore::open(&settings.db_path)?;
        let auth = AuthState::new(settings.password.as_deref())?;
        Ok(Self {
            settings: Arc::new(settings),
            roots: Arc::new(roots),
            shares: Arc::new(shares),
            undo: Arc::new(UndoLedger::new()),
            auth: Arc::new(auth),
        })
    }

    /// Root-constrained resolution; the rejection never says why.
    pub fn resolve_allowed(&self, request: &str) -> AppResult<std::path::PathBuf> {
        let (allowed, abs) = self.roots.resolve(request);
        if allowed {
            Ok(abs)
        } else {
            Err(AppError::path_not_allowed())
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Mount all routes. Share endpoints, login and the health probe stay outside
/// the session check; everything else under /api requires a session when a
/// password is configured.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/list", get(files::list))
        .route("/api/roots", get(files::roots))
        .route("/api/file", get(files::file_attachment))
        .route("/api/open", get(files::file_inline))
        .route("/api/read", get(files::read))
        .route("/api/save", post(files::save))
        .route("/api/search", post(files::search))
        .route("/api/upload", post(files::upload))
        .route("/api/mkdir", post(files::mkdir))
        .route("/api/delete", post(files::delete_path))
        .route("/api/rename", post(files::rename))
        .route("/api/move", post(files::move_path))
        .route("/api/copy", post(files::copy))
        .route("/api/undo", post(files::undo))
        .route("/api/stat", get(files::stat))
        .route("/api/update_meta", post(files::update_meta))
        .route("/api/zip", get(files::zip_single))
        .route("/api/zip/multiple", post(files::zip_multiple))
        .route("/api/pins", get(files::pins_list).post(files::pins_add).delete(files::pins_remove))
        .route("/api/share/create", post(share::create))
        .route("/api/admin/summary", get(admin::summary))
        .route("/api/admin/shares", get(admin::shares_list).delete(admin::share_delete))
        .route("/api/admin/shares/cleanup", post(admin::shares_cleanup))
        .route("/api/admin/pins", get(admin::pins_list).delete(admin::pin_delete))
        .route("/api/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    let public = Router::new()
        .route("/api/login", post(login))
        .route("/api/health", get(health))
        .route("/api/share/info", get(share::info))
        .route("/api/share/list", get(share::list))
        .route("/api/share/file", get(share::file))
        .route("/api/share/read", get(share::read))
        .route("/api/share/stat", get(share::stat))
        .route("/api/share/save", post(share::save))
        .route("/api/share/update_meta", post(share::update_meta))
        .route("/api/share/zip/multiple", post(share::zip_multiple));

    protected
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.settings.cors_allow_origins))
        .with_state(state)
}

/// Start the server on the configured port.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    run_with_listener(listener, settings).await
}

/// Start the server on an already-bound listener. Tests use this with an
/// ephemeral port.
pub async fn run_with_listener(
    listener: tokio::net::TcpListener,
    settings: Settings,
) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;
    for root in state.roots.roots() {
        info!(target: "startup", root = %root.display(), "serving root");
    }
    info!(
        target: "startup",
        auth = state.auth.enabled(),
        db = %state.settings.db_path.display(),
        "fileport starting on {}",
        listener.local_addr()?
    );
    let app = build_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct LoginPayload {
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> AppResult<impl IntoResponse> {
    let sid = state.auth.login(&payload.password)?;
    let mut headers = HeaderMap::new();
    headers.insert(axum::http::header::SET_COOKIE, auth::set_session_cookie(&sid));
    Ok((StatusCode::OK, headers, Json(json!({"status": "ok"}))))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(sid) = auth::parse_cookie(&headers, auth::SESSION_COOKIE) {
        state.auth.logout(&sid);
    }
    let mut out = HeaderMap::new();
    out.insert(axum::http::header::SET_COOKIE, auth::clear_session_cookie());
    (StatusCode::OK, out, Json(json!({"status": "ok"})))
}
