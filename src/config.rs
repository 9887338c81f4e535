//! Server configuration loaded from environment variables.
//!
//! All settings come from environment variables (or a `.env` file via
//! `dotenvy`). Missing or unparsable numeric values fall back to their
//! defaults. An unknown `TXLOG_BACKEND` is a hard error.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::StoreLimits;
use crate::error::LogError;
use crate::persistence::DEFAULT_QUEUE_CAPACITY;

/// Top-level server configuration.
///
/// Loaded once at startup via [`AppConfig::from_env`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Key and value size limits for the in-memory store.
    pub limits: StoreLimits,

    /// Transaction log settings.
    pub log: LogConfig,
}

/// Transaction log settings: which backend, and how deep the write queue is.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Selected backend and its connection parameters.
    pub backend: LogBackendConfig,

    /// Capacity of the bounded queue between producers and the writer.
    pub queue_capacity: usize,
}

/// Backend selector. Chosen once from configuration; the logger never
/// inspects its backend's type at runtime.
#[derive(Debug, Clone)]
pub enum LogBackendConfig {
    /// Newline-delimited file on local disk.
    File(FileLogConfig),
    /// `transactions` table in PostgreSQL.
    Postgres(PostgresLogConfig),
}

/// Backend names accepted by `TXLOG_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// `"file"`
    File,
    /// `"postgres"`
    Postgres,
}

impl FromStr for BackendKind {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(LogError::UnknownBackend(other.to_string())),
        }
    }
}

/// File backend parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLogConfig {
    /// Path of the log file. Created if absent.
    pub path: PathBuf,

    /// Call `fsync` after every appended record.
    pub sync_on_write: bool,
}

impl FileLogConfig {
    /// File backend at `path` without per-record `fsync`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_write: false,
        }
    }
}

/// PostgreSQL backend parameters.
#[derive(Clone)]
pub struct PostgresLogConfig {
    /// Database host name.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Login role.
    pub user: String,
    /// Login password. Redacted from `Debug` output.
    pub password: String,
    /// Database name.
    pub database: String,
    /// How long to wait for the initial connection.
    pub connect_timeout: Duration,
}

impl fmt::Debug for PostgresLogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresLogConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`], or if `TXLOG_BACKEND` names an unknown backend.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()?;

        let limits = StoreLimits {
            max_key_size: parse_env("MAX_KEY_SIZE", StoreLimits::default().max_key_size),
            max_value_size: parse_env("MAX_VALUE_SIZE", StoreLimits::default().max_value_size),
        };

        let kind: BackendKind = std::env::var("TXLOG_BACKEND")
            .unwrap_or_else(|_| "file".to_string())
            .parse()?;

        let backend = match kind {
            BackendKind::File => LogBackendConfig::File(FileLogConfig {
                path: std::env::var("TXLOG_FILE_PATH")
                    .unwrap_or_else(|_| "transaction.log".to_string())
                    .into(),
                sync_on_write: parse_env_bool("TXLOG_FILE_SYNC", false),
            }),
            BackendKind::Postgres => LogBackendConfig::Postgres(PostgresLogConfig {
                host: env_or("DB_HOST", "localhost"),
                port: parse_env("DB_PORT", 5432),
                user: env_or("DB_USER", "gouser"),
                password: env_or("DB_PASSWORD", "go123"),
                database: env_or("DB_NAME", "go_cloud_native"),
                connect_timeout: Duration::from_secs(parse_env("DB_CONNECT_TIMEOUT_SECS", 5)),
            }),
        };

        let queue_capacity = parse_env("TXLOG_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY).max(1);

        Ok(Self {
            listen_addr,
            limits,
            log: LogConfig {
                backend,
                queue_capacity,
            },
        })
    }
}

/// Returns the variable's value, or `default` when unset or empty.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}
