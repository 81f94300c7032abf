use moodsync_store::StoreError;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Entry rejected: {0}")]
    InvalidEntry(String),

    #[error("Local store lock poisoned")]
    Lock,

    #[error("Sync actor has stopped")]
    Closed,
}
