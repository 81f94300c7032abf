//! # moodsync-server
//!
//! Sync server for the moodsync diary.
//!
//! This binary provides:
//! - **Pull / push endpoints** that reconcile a device's entry set with the
//!   copy kept server side, last write wins by edit time
//! - **Field encryption at rest** for the sensitive parts of each entry
//! - **Identity endpoints** (sign-in, identity check, username, delete), all
//!   authenticated by a platform-signed identity payload
//! - **Per-identity rate gating** of every operation

mod account;
mod api;
mod config;
mod error;
mod rate_limit;
mod remote;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use moodsync_shared::crypto::FieldCipher;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::remote::{MemoryStore, RemoteStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,moodsync_server=debug")),
        )
        .init();

    info!("Starting moodsync server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    if config.bot_token.is_none() {
        warn!("BOT_TOKEN is not set, every identity check will fail");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // A store that fails to open is kept as an error: requests answer
    // db-error instead of the process exiting.
    let store = open_store(&config);

    let cipher = FieldCipher::from_passphrase(config.encryption_key.as_deref());
    if !cipher.is_enabled() {
        warn!("ENCRYPTION_KEY is not set, entry fields are stored in plaintext");
    }

    let http_addr = config.http_addr;
    let app_state = AppState::new(config, store, cipher);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate gate cleanup (every 5 minutes, evict keys idle >10 min)
    let gate = app_state.rate_gate.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            gate.purge_stale(Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

/// `DATABASE_PATH=:memory:` runs on a throwaway in-process store.
fn open_store(config: &ServerConfig) -> Result<Arc<dyn RemoteStore>, String> {
    if config.database_path.as_os_str() == ":memory:" {
        warn!("using the in-memory store, nothing survives a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    SqliteStore::open(&config.database_path)
        .and_then(|store| store.ping().map(|()| store))
        .map(|store| Arc::new(store) as Arc<dyn RemoteStore>)
        .map_err(|e| {
            tracing::error!(
                error = %e,
                path = %config.database_path.display(),
                "remote store unavailable"
            );
            e.to_string()
        })
}
