//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use college_shared::constants::{DEFAULT_MAX_DATASETS_PER_USER, DEFAULT_MAX_FILE_SIZE};

/// Slowest accepted upload rate; below this a bucket could never hold a token.
const MIN_UPLOAD_RATE: f64 = 0.5;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./college.db`
    pub database_path: PathBuf,

    /// Filesystem root where dataset documents are stored.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./blobs`
    pub blob_storage_path: PathBuf,

    // -- Identity service --
    /// Env: `AUTH_SERVICE_URL`
    pub auth_service_url: String,

    /// Sent as `X-Internal-Token` on directory searches.
    /// Env: `AUTH_INTERNAL_TOKEN`
    pub auth_internal_token: String,

    /// Env: `AUTH_TIMEOUT_SECS`
    pub auth_timeout: Duration,

    // -- Indexing / answering service --
    /// Env: `RAG_SERVICE_URL`
    pub rag_service_url: String,

    /// Bearer token for the indexing service.
    /// Env: `RAG_SERVICE_TOKEN`
    pub rag_service_token: String,

    /// Indexing large documents is slow, hence the generous default.
    /// Env: `RAG_TIMEOUT_SECS`
    pub rag_timeout: Duration,

    // -- Limits --
    /// Env: `MAX_DATASETS_PER_USER`
    pub max_datasets_per_user: u64,

    /// Maximum document size in bytes.
    /// Env: `MAX_FILE_SIZE`
    pub max_file_size: usize,

    /// Sustained tokens per second for upload and ask. Burst is twice this.
    /// Env: `UPLOAD_RATE_LIMIT`
    pub upload_rate_limit: f64,

    /// Env: `CORS_ALLOW_ORIGIN`
    /// Default: `*`
    pub cors_allow_origin: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("blob_storage_path", &self.blob_storage_path)
            .field("auth_service_url", &self.auth_service_url)
            .field("auth_internal_token", &redacted(&self.auth_internal_token))
            .field("auth_timeout", &self.auth_timeout)
            .field("rag_service_url", &self.rag_service_url)
            .field("rag_service_token", &redacted(&self.rag_service_token))
            .field("rag_timeout", &self.rag_timeout)
            .field("max_datasets_per_user", &self.max_datasets_per_user)
            .field("max_file_size", &self.max_file_size)
            .field("upload_rate_limit", &self.upload_rate_limit)
            .field("cors_allow_origin", &self.cors_allow_origin)
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: PathBuf::from("./college.db"),
            blob_storage_path: PathBuf::from("./blobs"),
            auth_service_url: "http://localhost:8081".to_string(),
            auth_internal_token: String::new(),
            auth_timeout: Duration::from_secs(10),
            rag_service_url: "http://localhost:8000".to_string(),
            rag_service_token: String::new(),
            rag_timeout: Duration::from_secs(120),
            max_datasets_per_user: u64::from(DEFAULT_MAX_DATASETS_PER_USER),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            upload_rate_limit: 5.0,
            cors_allow_origin: "*".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparseable values are
    /// logged and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        // -- Identity service --

        if let Some(url) = lookup("AUTH_SERVICE_URL") {
            config.auth_service_url = url.trim_end_matches('/').to_string();
        }

        if let Some(token) = lookup("AUTH_INTERNAL_TOKEN") {
            config.auth_internal_token = token;
        }

        let mut secs = config.auth_timeout.as_secs();
        parse_into(&lookup, "AUTH_TIMEOUT_SECS", &mut secs);
        config.auth_timeout = Duration::from_secs(secs);

        // -- Indexing service --

        if let Some(url) = lookup("RAG_SERVICE_URL") {
            config.rag_service_url = url.trim_end_matches('/').to_string();
        }

        if let Some(token) = lookup("RAG_SERVICE_TOKEN") {
            config.rag_service_token = token;
        }

        let mut secs = config.rag_timeout.as_secs();
        parse_into(&lookup, "RAG_TIMEOUT_SECS", &mut secs);
        config.rag_timeout = Duration::from_secs(secs);

        // -- Limits --

        parse_into(&lookup, "MAX_DATASETS_PER_USER", &mut config.max_datasets_per_user);
        parse_into(&lookup, "MAX_FILE_SIZE", &mut config.max_file_size);
        parse_into(&lookup, "UPLOAD_RATE_LIMIT", &mut config.upload_rate_limit);
        if !config.upload_rate_limit.is_finite() || config.upload_rate_limit < MIN_UPLOAD_RATE {
            tracing::warn!(
                value = config.upload_rate_limit,
                min = MIN_UPLOAD_RATE,
                "UPLOAD_RATE_LIMIT out of range, using default"
            );
            config.upload_rate_limit = Self::default().upload_rate_limit;
        }

        if let Some(origin) = lookup("CORS_ALLOW_ORIGIN") {
            config.cors_allow_origin = origin;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "invalid value, using default"),
    }
}
