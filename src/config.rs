//! Process configuration, read once from environment variables at startup.
//!
//! - `FILEPORT_PORT` HTTP port (default 8080)
//! - `FILEPORT_ROOTS` allowed roots, platform path-list syntax (default: cwd)
//! - `FILEPORT_DB` SQLite file for shares and pins (default fileport.sqlite3)
//! - `FILEPORT_PASSWORD` when set, session auth is enabled with this password
//! - `FILEPORT_CORS_ORIGINS` comma-separated allowed origins

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub root_dirs: Vec<PathBuf>,
    pub db_path: PathBuf,
    pub password: Option<String>,
    pub cors_allow_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        let port = std::env::var("FILEPORT_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(8080);

        let root_dirs = match std::env::var_os("FILEPORT_ROOTS") {
            Some(raw) => std::env::split_paths(&raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect(),
            None => Vec::new(),
        };
        let root_dirs = if root_dirs.is_empty() {
            vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))]
        } else {
            root_dirs
        };

        let db_path = std::env::var("FILEPORT_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("fileport.sqlite3"));

        let password = std::env::var("FILEPORT_PASSWORD").ok().filter(|s| !s.is_empty());

        let cors_allow_origins = std::env::var("FILEPORT_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Settings { port, root_dirs, db_path, password, cors_allow_origins }
    }

    /// Session auth is on exactly when a password is configured.
    pub fn auth_enabled(&self) -> bool {
        self.password.is_some()
    }
}
