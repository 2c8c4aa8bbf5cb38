//! Session authentication boundary.
//!
//! The core only ever consumes a per-request boolean: authenticated or not.
//! A single process-wide password (argon2-hashed at startup) gates login;
//! logging in mints a random session id delivered as an HttpOnly cookie.
//! Share-scoped routes sit outside this check entirely, because possession of
//! the share token is the credential there.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use std::collections::HashSet;

use crate::error::{AppError, AppResult};
use crate::server::AppState;
use crate::tokens::urlsafe_token;

pub const SESSION_COOKIE: &str = "fileport_session";

pub fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| AppError::internal("entropy", &e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::internal("hash_salt", &e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal("hash_password", &e.to_string()))?
        .to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

/// Login state owned by the serving process. When no password is configured
/// the check is disabled and every request counts as authenticated.
pub struct AuthState {
    password_hash: Option<String>,
    sessions: RwLock<HashSet<String>>,
}

impl AuthState {
    pub fn new(password: Option<&str>) -> AppResult<Self> {
        let password_hash = match password {
            Some(p) => Some(hash_password(p)?),
            None => None,
        };
        Ok(AuthState { password_hash, sessions: RwLock::new(HashSet::new()) })
    }

    pub fn enabled(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Verify the login password and mint a session id on success.
    pub fn login(&self, password: &str) -> AppResult<String> {
        let Some(hash) = self.password_hash.as_deref() else {
            // Auth disabled: hand out a session anyway so clients behave the
            // same either way.
            return Ok(self.new_session());
        };
        if !verify_password(hash, password) {
            return Err(AppError::auth("invalid_credentials", "Invalid credentials"));
        }
        Ok(self.new_session())
    }

    fn new_session(&self) -> String {
        let sid = urlsafe_token(24);
        self.sessions.write().insert(sid.clone());
        sid
    }

    pub fn logout(&self, sid: &str) {
        self.sessions.write().remove(sid);
    }

    pub fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        if !self.enabled() {
            return true;
        }
        match parse_cookie(headers, SESSION_COOKIE) {
            Some(sid) => self.sessions.read().contains(&sid),
            None => false,
        }
    }
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                return Some(v[1..].to_string());
            }
        }
    }
    None
}

pub fn set_session_cookie(sid: &str) -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/",
        SESSION_COOKIE, sid
    ))
    .expect("session cookie is always valid header text")
}

pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax; Path=/",
        SESSION_COOKIE
    ))
    .expect("session cookie is always valid header text")
}

/// Middleware over the authenticated route group. Share and login routes are
/// mounted outside of it.
pub async fn require_session(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if state.auth.is_authenticated(req.headers()) {
        next.run(req).await
    } else {
        AppError::auth("unauthorized", "Unauthorized").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "correct horse"));
        assert!(!verify_password(&hash, "wrong"));
        assert!(!verify_password("not-a-phc-string", "anything"));
    }

    #[test]
    fn disabled_auth_accepts_everything() {
        let auth = AuthState::new(None).unwrap();
        assert!(!auth.enabled());
        assert!(auth.is_authenticated(&HeaderMap::new()));
        // login still mints a usable session
        assert!(auth.login("ignored").is_ok());
    }

    #[test]
    fn session_lifecycle() {
        let auth = AuthState::new(Some("secret")).unwrap();
        assert!(auth.enabled());
        assert!(!auth.is_authenticated(&HeaderMap::new()));
        assert!(auth.login("nope").is_err());

        let sid = auth.login("secret").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, sid)).unwrap(),
        );
        assert!(auth.is_authenticated(&headers));
        auth.logout(&sid);
        assert!(!auth.is_authenticated(&headers));
    }

    #[test]
    fn cookie_parsing_handles_multiple_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("other=1; fileport_session=abc123; theme=dark"),
        );
        assert_eq!(parse_cookie(&headers, SESSION_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(parse_cookie(&headers, "missing"), None);
    }
}
