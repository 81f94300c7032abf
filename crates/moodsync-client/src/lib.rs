//! # moodsync-client
//!
//! Device side of moodsync sync: a local-first entry store kept in step with
//! the sync server by a single background actor.

pub mod actor;
pub mod config;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod queue;
pub mod signals;
pub mod transport;

use tracing_subscriber::{fmt, EnvFilter};

pub use actor::{spawn, SyncHandle};
pub use config::ClientConfig;
pub use engine::{EngineConfig, SyncStatus};
pub use error::SyncError;
pub use signals::{IdentityCell, RuntimeSignals};
pub use transport::{HttpTransport, SyncTransport, TransportError};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,moodsync_client=debug,moodsync_store=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
