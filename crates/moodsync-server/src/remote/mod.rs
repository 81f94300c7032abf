//! Read/write contract of the store the server keeps identities and entries in.
//!
//! Handlers only talk to [`RemoteStore`]; the SQLite backend is what the binary
//! runs on, the in-memory one backs tests and throwaway instances.

mod memory;
mod sqlite;

use std::collections::HashMap;

use moodsync_shared::types::{IdentityProfile, ReminderPrefs, UserId};
use moodsync_shared::protocol::Account;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Error)]
pub enum RemoteStoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The store cannot upsert keyed on (user, date); callers fall back to
    /// per-row insert/update.
    #[error("Batched upsert is not supported by this store")]
    UpsertUnsupported,

    #[error("Username is owned by another user")]
    UsernameTaken,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, RemoteStoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub timezone: String,
    pub reminders: ReminderPrefs,
}

impl UserRecord {
    pub fn new(profile: &IdentityProfile) -> Self {
        Self {
            id: profile.id,
            username: None,
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            language_code: profile.language_code.clone(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            reminders: ReminderPrefs::default(),
        }
    }
}

impl From<UserRecord> for Account {
    fn from(user: UserRecord) -> Self {
        Account {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            language_code: user.language_code,
            timezone: user.timezone,
            reminders: user.reminders,
        }
    }
}

/// An entry as stored: sensitive fields hold envelopes (or legacy plaintext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRow {
    pub date: String,
    /// JSON array of emojis, encrypted as one field.
    pub emojis: String,
    pub hue: Option<u16>,
    pub song_title: Option<String>,
    pub song_artist: Option<String>,
    /// Client edit time, epoch ms.
    pub updated_at: i64,
    /// Server write time, epoch ms. Incremental pulls filter on it.
    pub synced_at: i64,
}

pub trait RemoteStore: Send + Sync {
    /// Cheap liveness probe run once at startup.
    fn ping(&self) -> Result<()>;

    fn get_user(&self, id: UserId) -> Result<Option<UserRecord>>;

    /// Create the user or refresh its profile fields. `timezone` and
    /// `reminders` overwrite stored values only when given. The username is
    /// left untouched.
    fn upsert_user(
        &self,
        profile: &IdentityProfile,
        timezone: Option<&str>,
        reminders: Option<&ReminderPrefs>,
    ) -> Result<UserRecord>;

    /// Exact match on the normalized (lowercase) username.
    fn find_user_id_by_username(&self, username: &str) -> Result<Option<UserId>>;

    /// Fails with [`RemoteStoreError::UsernameTaken`] when another user owns it.
    fn set_username(&self, id: UserId, username: &str) -> Result<()>;

    /// Remove the user and every entry it owns. `false` if it did not exist.
    fn delete_user(&self, id: UserId) -> Result<bool>;

    /// Entries of a user, optionally only those written after `since_ms`,
    /// ordered by date. The filter is on `synced_at`, the server write time,
    /// not on the client edit time, so one clock drives the pull cursor.
    fn fetch_entries(&self, id: UserId, since_ms: Option<i64>) -> Result<Vec<EntryRow>>;

    /// Stored `updated_at` for each of `dates` that exists.
    fn fetch_updated_at(&self, id: UserId, dates: &[String]) -> Result<HashMap<String, i64>>;

    /// Insert-or-replace every row keyed on (user, date), all or nothing.
    /// A stored row is only replaced by one with a strictly newer `updated_at`.
    fn upsert_entries(&self, id: UserId, rows: &[EntryRow]) -> Result<()>;

    fn insert_entry(&self, id: UserId, row: &EntryRow) -> Result<()>;

    /// Same newer-only rule as [`RemoteStore::upsert_entries`].
    fn update_entry(&self, id: UserId, row: &EntryRow) -> Result<()>;
}
