//! Sync client configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::engine::EngineConfig;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080/";

#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the sync server, always ending in `/`.
    /// Env: `SYNC_SERVER_URL`
    pub server_url: String,
    /// Signed identity payload. Env: `INIT_DATA`
    pub init_data: Option<String>,
    /// Local database file; the platform data dir when unset.
    /// Env: `MOODSYNC_DB_PATH`
    pub db_path: Option<PathBuf>,
    /// Env: `SYNC_DEBOUNCE_MS`
    pub debounce: Duration,
    /// Env: `SYNC_PULL_INTERVAL_SECS`
    pub pull_interval: Duration,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_url", &self.server_url)
            .field("init_data", &self.init_data.as_ref().map(|_| "<redacted>"))
            .field("db_path", &self.db_path)
            .field("debounce", &self.debounce)
            .field("pull_interval", &self.pull_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            init_data: None,
            db_path: None,
            debounce: engine.debounce,
            pull_interval: engine.pull_interval,
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = var("SYNC_SERVER_URL").filter(|v| !v.trim().is_empty()) {
            match parse_base_url(raw.trim()) {
                Ok(url) => config.server_url = url.to_string(),
                Err(e) => tracing::warn!(value = %raw, error = %e, "Invalid SYNC_SERVER_URL, using default"),
            }
        }

        config.init_data = var("INIT_DATA").filter(|v| !v.trim().is_empty());
        config.db_path = var("MOODSYNC_DB_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        if let Some(val) = var("SYNC_DEBOUNCE_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) => config.debounce = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %val, "Invalid SYNC_DEBOUNCE_MS, using default"),
            }
        }
        if let Some(val) = var("SYNC_PULL_INTERVAL_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.pull_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid SYNC_PULL_INTERVAL_SECS, using default"),
            }
        }

        config
    }

    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        parse_base_url(&self.server_url)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            debounce: self.debounce,
            pull_interval: self.pull_interval,
            ..EngineConfig::default()
        }
    }
}

/// Parse a base URL so that relative joins keep its path prefix.
fn parse_base_url(raw: &str) -> Result<Url, url::ParseError> {
    if raw.ends_with('/') {
        Url::parse(raw)
    } else {
        Url::parse(&format!("{raw}/"))
    }
}
