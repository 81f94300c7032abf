//! # moodsync-store
//!
//! Local persistence for the diary, backed by SQLite.
//!
//! A single key/value table holds the versioned entry blob and the sync
//! metadata (cursor, enabled flag, cached username). The crate exposes a
//! synchronous `Database` handle; callers that live on an async runtime wrap
//! it in a mutex and keep each call short.

pub mod database;
pub mod entries;
pub mod migrations;
pub mod sync_state;

mod error;

pub use database::Database;
pub use entries::upsert_entry;
pub use error::StoreError;
