//! Share registry: revocable, optionally time-limited capabilities granting
//! scoped access to one subtree without the main session credential.
//!
//! Records persist in SQLite (`shares` table) next to the pinned-path
//! favorites (`pins` table). Reads are frequent and writes rare, so a single
//! mutex around the connection is enough; it is never held across filesystem
//! I/O. Share-relative paths resolve with the same component-aligned
//! containment discipline as the root resolver, after symlink resolution, and
//! absolute inputs are rejected outright.

use chrono::Utc;
use parking_lot::Mutex;
use path_absolutize::Absolutize;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::auth;
use crate::error::{AppError, AppResult};
use crate::paths::canonicalize_existing;
use crate::tokens::urlsafe_token;

#[derive(Debug, Clone, Serialize)]
pub struct ShareRecord {
    pub token: String,
    pub root: PathBuf,
    pub readonly: bool,
    pub allow_download: bool,
    pub allow_edit: bool,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// Epoch seconds; None means the share never expires.
    pub expires_at: Option<f64>,
}

impl ShareRecord {
    pub fn password_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShareOptions {
    pub readonly: bool,
    pub allow_download: bool,
    pub allow_edit: bool,
    pub password: Option<String>,
    pub expires_hours: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pin {
    pub id: i64,
    pub path: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
    pub shares: i64,
    pub pins: i64,
}

pub struct ShareStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> AppError {
    AppError::internal("store_error", &e.to_string())
}

fn now_epoch() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

impl ShareStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        // WAL keeps concurrent readers cheap; ignore failure for :memory:.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS shares (
                token TEXT PRIMARY KEY,
                root TEXT NOT NULL,
                readonly INTEGER NOT NULL,
                allow_download INTEGER NOT NULL,
                allow_edit INTEGER NOT NULL,
                password_hash TEXT,
                expires_at REAL
            );
            CREATE TABLE IF NOT EXISTS pins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(ShareStore { conn: Mutex::new(conn) })
    }

    /// Create a share rooted at `root`, which the caller must already have
    /// vetted through the root resolver and confirmed to exist. The root is
    /// stored in canonical form so later containment checks compare like with
    /// like.
    pub fn create(&self, root: &Path, opts: ShareOptions) -> AppResult<ShareRecord> {
        let token = urlsafe_token(24);
        let root = canonicalize_existing(root);
        let expires_at = match opts.expires_hours {
            Some(h) if h > 0.0 => Some(now_epoch() + h * 3600.0),
            _ => None,
        };
        let password_hash = match opts.password.as_deref().filter(|p| !p.is_empty()) {
            Some(p) => Some(auth::hash_password(p)?),
            None => None,
        };
        let record = ShareRecord {
            token: token.clone(),
            root,
            readonly: opts.readonly,
            allow_download: opts.allow_download,
            allow_edit: opts.allow_edit,
            password_hash,
            expires_at,
        };
        self.conn
            .lock()
            .execute(
                "INSERT INTO shares(token, root, readonly, allow_download, allow_edit, password_hash, expires_at) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.token,
                    record.root.to_string_lossy(),
                    record.readonly as i64,
                    record.allow_download as i64,
                    record.allow_edit as i64,
                    record.password_hash,
                    record.expires_at,
                ],
            )
            .map_err(db_err)?;
        Ok(record)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShareRecord> {
        Ok(ShareRecord {
            token: row.get(0)?,
            root: PathBuf::from(row.get::<_, String>(1)?),
            readonly: row.get::<_, i64>(2)? != 0,
            allow_download: row.get::<_, i64>(3)? != 0,
            allow_edit: row.get::<_, i64>(4)? != 0,
            password_hash: row.get(5)?,
            expires_at: row.get(6)?,
        })
    }

    pub fn get(&self, token: &str) -> AppResult<Option<ShareRecord>> {
        self.conn
            .lock()
            .query_row(
                "SELECT token, root, readonly, allow_download, allow_edit, password_hash, expires_at \
                 FROM shares WHERE token = ?1",
                params![token],
                Self::row_to_record,
            )
            .optional()
            .map_err(db_err)
    }

    /// Look up a live share: unknown tokens are NotFound, and the first lookup
    /// past the expiry deletes the record and reports Gone, so the next lookup
    /// is NotFound again.
    pub fn get_live(&self, token: &str) -> AppResult<ShareRecord> {
        let record = self
            .get(token)?
            .ok_or_else(|| AppError::not_found("share_not_found", "Share not found"))?;
        if let Some(expires_at) = record.expires_at {
            if now_epoch() > expires_at {
                self.delete(token)?;
                return Err(AppError::gone("share_expired", "Share expired"));
            }
        }
        Ok(record)
    }

    /// Resolve a share-relative path against the share's root. `rel_path` must
    /// be relative; the canonical target must stay under the share root. The
    /// share's password, when set, must be supplied and match.
    pub fn resolve(
        &self,
        token: &str,
        rel_path: &str,
        password: Option<&str>,
    ) -> AppResult<(ShareRecord, PathBuf)> {
        let record = self.get_live(token)?;
        if let Some(hash) = record.password_hash.as_deref() {
            let supplied = password.unwrap_or("");
            if !auth::verify_password(hash, supplied) {
                return Err(AppError::forbidden("share_password", "Share password required"));
            }
        }
        let rel = rel_path.trim();
        if rel.is_empty() || rel == "." {
            return Ok((record.clone(), record.root.clone()));
        }
        let rel_p = Path::new(rel);
        if rel_p.is_absolute() || rel_p.has_root() {
            return Err(AppError::forbidden(
                "share_absolute_path",
                "Absolute paths are not allowed in a share",
            ));
        }
        let joined = record.root.join(rel_p);
        let abs = joined
            .absolutize()
            .map(|p| p.into_owned())
            .map_err(|_| AppError::forbidden("share_path_outside", "Path outside share"))?;
        let target = canonicalize_existing(&abs);
        if !target.starts_with(&record.root) {
            return Err(AppError::forbidden("share_path_outside", "Path outside share"));
        }
        Ok((record, target))
    }

    pub fn delete(&self, token: &str) -> AppResult<bool> {
        let n = self
            .conn
            .lock()
            .execute("DELETE FROM shares WHERE token = ?1", params![token])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    pub fn list(&self) -> AppResult<Vec<ShareRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT token, root, readonly, allow_download, allow_edit, password_hash, expires_at \
                 FROM shares ORDER BY rowid DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], Self::row_to_record)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Delete every record whose expiry has passed; returns the count removed.
    /// Safe to call repeatedly.
    pub fn cleanup_expired(&self) -> AppResult<usize> {
        self.conn
            .lock()
            .execute(
                "DELETE FROM shares WHERE expires_at IS NOT NULL AND expires_at < ?1",
                params![now_epoch()],
            )
            .map_err(db_err)
    }

    pub fn counts(&self) -> AppResult<StoreCounts> {
        let conn = self.conn.lock();
        let shares: i64 = conn
            .query_row("SELECT COUNT(1) FROM shares", [], |r| r.get(0))
            .map_err(db_err)?;
        let pins: i64 = conn
            .query_row("SELECT COUNT(1) FROM pins", [], |r| r.get(0))
            .map_err(db_err)?;
        Ok(StoreCounts { shares, pins })
    }

    // ---- Pinned paths (favorites; not part of the security core) ----

    pub fn list_pins(&self) -> AppResult<Vec<Pin>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, path, created_at FROM pins ORDER BY id DESC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Pin { id: row.get(0)?, path: row.get(1)?, created_at: row.get(2)? })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn add_pin(&self, path: &str) -> AppResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR IGNORE INTO pins(path, created_at) VALUES(?1, ?2)",
                params![path, Utc::now().timestamp()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn remove_pin_by_path(&self, path: &str) -> AppResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM pins WHERE path = ?1", params![path])
            .map_err(db_err)?;
        Ok(())
    }

    pub fn remove_pin_by_id(&self, id: i64) -> AppResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM pins WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    #[cfg(test)]
    fn force_expire(&self, token: &str) {
        self.conn
            .lock()
            .execute(
                "UPDATE shares SET expires_at = ?1 WHERE token = ?2",
                params![now_epoch() - 10.0, token],
            )
            .unwrap();
    }
}
