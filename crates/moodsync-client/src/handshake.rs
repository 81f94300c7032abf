//! Once-per-session identity check run before the first pull or push.

use std::time::Duration;

use tokio::time::Instant;

use crate::signals::IdentityCell;
use crate::transport::{SyncTransport, TransportError};

pub const IDENTITY_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const IDENTITY_WAIT_LIMIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Verified { username: Option<String> },
    /// The server no longer knows this identity.
    Gone,
    Failed(String),
}

/// Wait for the host to provide the identity payload.
pub async fn wait_for_identity(cell: &IdentityCell, poll: Duration, limit: Duration) -> Option<String> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(init_data) = cell.get() {
            return Some(init_data);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(poll).await;
    }
}

pub async fn run<T: SyncTransport>(transport: &T, identity: &IdentityCell) -> HandshakeOutcome {
    let Some(init_data) =
        wait_for_identity(identity, IDENTITY_POLL_INTERVAL, IDENTITY_WAIT_LIMIT).await
    else {
        return HandshakeOutcome::Failed("identity payload not available".into());
    };

    match transport.me(&init_data).await {
        Ok(me) => {
            tracing::debug!(user = %me.id, "identity confirmed");
            HandshakeOutcome::Verified {
                username: me.username,
            }
        }
        Err(TransportError::Gone) => HandshakeOutcome::Gone,
        Err(e) => HandshakeOutcome::Failed(e.to_string()),
    }
}
