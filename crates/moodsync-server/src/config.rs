//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite file backing the remote store.
    /// Env: `DATABASE_PATH`
    /// Default: `./moodsync-server.db`
    pub database_path: PathBuf,

    /// Bot token the identity payloads are signed with.
    /// Env: `BOT_TOKEN`
    /// Default: none, every identity check then fails.
    pub bot_token: Option<String>,

    /// Passphrase the field encryption key is derived from.
    /// Env: `ENCRYPTION_KEY`
    /// Default: none (fields stored in plaintext).
    pub encryption_key: Option<String>,

    /// Minimum spacing between two pulls of one identity.
    /// Env: `PULL_MIN_INTERVAL_MS`
    pub pull_min_interval: Duration,

    /// Minimum spacing between two pushes of one identity.
    /// Env: `PUSH_MIN_INTERVAL_MS`
    pub push_min_interval: Duration,

    /// Minimum spacing between two account calls (sign-in, username, delete).
    /// Env: `ACCOUNT_MIN_INTERVAL_MS`
    pub account_min_interval: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("pull_min_interval", &self.pull_min_interval)
            .field("push_min_interval", &self.push_min_interval)
            .field("account_min_interval", &self.account_min_interval)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: PathBuf::from("./moodsync-server.db"),
            bot_token: None,
            encryption_key: None,
            pull_min_interval: Duration::from_millis(1000),
            push_min_interval: Duration::from_millis(200),
            account_min_interval: Duration::from_millis(1000),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = PathBuf::from(path);
        }

        config.bot_token = var("BOT_TOKEN").filter(|t| !t.trim().is_empty());
        config.encryption_key = var("ENCRYPTION_KEY").filter(|k| !k.trim().is_empty());

        for (key, slot) in [
            ("PULL_MIN_INTERVAL_MS", &mut config.pull_min_interval),
            ("PUSH_MIN_INTERVAL_MS", &mut config.push_min_interval),
            ("ACCOUNT_MIN_INTERVAL_MS", &mut config.account_min_interval),
        ] {
            if let Some(val) = var(key) {
                match val.trim().parse::<u64>() {
                    Ok(ms) => *slot = Duration::from_millis(ms),
                    Err(_) => tracing::warn!(key, value = %val, "Invalid interval, using default"),
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.bot_token.is_none());
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = from_map(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/x.db"),
            ("BOT_TOKEN", "1:abc"),
            ("ENCRYPTION_KEY", "  "),
            ("PULL_MIN_INTERVAL_MS", "2500"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.bot_token.as_deref(), Some("1:abc"));
        assert!(config.encryption_key.is_none());
        assert_eq!(config.pull_min_interval, Duration::from_millis(2500));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_map(&[("HTTP_ADDR", "nope"), ("PUSH_MIN_INTERVAL_MS", "-5")]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.push_min_interval, defaults.push_min_interval);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = from_map(&[("BOT_TOKEN", "secret-token"), ("ENCRYPTION_KEY", "pass")]);
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret-token"));
        assert!(!printed.contains("pass\""));
    }
}
