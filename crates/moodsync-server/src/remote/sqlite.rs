use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use moodsync_shared::types::{now_ms, IdentityProfile, ReminderPrefs, UserId};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};

use super::{EntryRow, RemoteStore, RemoteStoreError, Result, UserRecord, DEFAULT_TIMEZONE};

const SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                INTEGER PRIMARY KEY NOT NULL,
    username          TEXT UNIQUE,
    first_name        TEXT,
    last_name         TEXT,
    language_code     TEXT,
    timezone          TEXT NOT NULL,
    reminders_enabled INTEGER NOT NULL DEFAULT 0,
    reminder_hour     INTEGER,
    created_at        INTEGER NOT NULL,          -- epoch ms
    updated_at        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    date        TEXT NOT NULL,                   -- YYYY-MM-DD
    emojis      TEXT NOT NULL,                   -- envelope of a JSON array
    hue         INTEGER,
    song_title  TEXT,
    song_artist TEXT,
    updated_at  INTEGER NOT NULL,                -- client edit time, epoch ms
    synced_at   INTEGER NOT NULL                 -- server write time, epoch ms
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_user_date ON entries(user_id, date);
CREATE INDEX IF NOT EXISTS idx_entries_user_synced ON entries(user_id, synced_at);
"#;

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, language_code, timezone, reminders_enabled, reminder_hour";

const ENTRY_COLUMNS: &str =
    "date, emojis, hue, song_title, song_artist, updated_at, synced_at";

/// [`RemoteStore`] on a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current < SCHEMA_VERSION {
            tracing::info!(from = current, to = SCHEMA_VERSION, "migrating remote store schema");
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RemoteStoreError::Unavailable("connection lock poisoned".into()))
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let enabled: i64 = row.get(6)?;
    Ok(UserRecord {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        language_code: row.get(4)?,
        timezone: row.get(5)?,
        reminders: ReminderPrefs {
            enabled: enabled != 0,
            hour: row.get(7)?,
        },
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        date: row.get(0)?,
        emojis: row.get(1)?,
        hue: row.get(2)?,
        song_title: row.get(3)?,
        song_artist: row.get(4)?,
        updated_at: row.get(5)?,
        synced_at: row.get(6)?,
    })
}

fn query_user(conn: &Connection, id: UserId) -> Result<Option<UserRecord>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.0],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// SQLite refuses an `ON CONFLICT` target that no unique index covers.
fn is_missing_conflict_target(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => {
            msg.contains("ON CONFLICT clause does not match")
        }
        _ => false,
    }
}

impl RemoteStore for SqliteStore {
    fn ping(&self) -> Result<()> {
        self.conn()?.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn get_user(&self, id: UserId) -> Result<Option<UserRecord>> {
        query_user(&*self.conn()?, id)
    }

    fn upsert_user(
        &self,
        profile: &IdentityProfile,
        timezone: Option<&str>,
        reminders: Option<&ReminderPrefs>,
    ) -> Result<UserRecord> {
        let conn = self.conn()?;
        let now = now_ms();

        conn.execute(
            "INSERT INTO users (id, first_name, last_name, language_code, timezone, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET first_name = excluded.first_name,
                                           last_name = excluded.last_name,
                                           language_code = excluded.language_code,
                                           updated_at = excluded.updated_at",
            params![
                profile.id.0,
                profile.first_name,
                profile.last_name,
                profile.language_code,
                DEFAULT_TIMEZONE,
                now,
            ],
        )?;

        if let Some(tz) = timezone {
            conn.execute(
                "UPDATE users SET timezone = ?2 WHERE id = ?1",
                params![profile.id.0, tz],
            )?;
        }
        if let Some(prefs) = reminders {
            conn.execute(
                "UPDATE users SET reminders_enabled = ?2, reminder_hour = ?3 WHERE id = ?1",
                params![profile.id.0, prefs.enabled, prefs.hour],
            )?;
        }

        query_user(&conn, profile.id)?
            .ok_or_else(|| RemoteStoreError::Unavailable("user vanished after upsert".into()))
    }

    fn find_user_id_by_username(&self, username: &str) -> Result<Option<UserId>> {
        let id = self
            .conn()?
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(UserId))
    }

    fn set_username(&self, id: UserId, username: &str) -> Result<()> {
        let result = self.conn()?.execute(
            "UPDATE users SET username = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.0, username, now_ms()],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RemoteStoreError::UsernameTaken),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_user(&self, id: UserId) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE user_id = ?1", params![id.0])?;
        let affected = tx.execute("DELETE FROM users WHERE id = ?1", params![id.0])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    fn fetch_entries(&self, id: UserId, since_ms: Option<i64>) -> Result<Vec<EntryRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE user_id = ?1 AND synced_at > ?2
             ORDER BY date ASC"
        ))?;

        let rows = stmt.query_map(params![id.0, since_ms.unwrap_or(i64::MIN)], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn fetch_updated_at(&self, id: UserId, dates: &[String]) -> Result<HashMap<String, i64>> {
        if dates.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn()?;
        let placeholders = vec!["?"; dates.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT date, updated_at FROM entries WHERE user_id = ? AND date IN ({placeholders})"
        ))?;

        let params = std::iter::once(rusqlite::types::Value::Integer(id.0))
            .chain(dates.iter().cloned().map(rusqlite::types::Value::Text));
        let rows = stmt.query_map(params_from_iter(params), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stored = HashMap::with_capacity(dates.len());
        for row in rows {
            let (date, updated_at) = row?;
            stored.insert(date, updated_at);
        }
        Ok(stored)
    }

    fn upsert_entries(&self, id: UserId, rows: &[EntryRow]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = match tx.prepare(&format!(
                "INSERT INTO entries (user_id, {ENTRY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id, date) DO UPDATE SET emojis = excluded.emojis,
                                                          hue = excluded.hue,
                                                          song_title = excluded.song_title,
                                                          song_artist = excluded.song_artist,
                                                          updated_at = excluded.updated_at,
                                                          synced_at = excluded.synced_at
                 WHERE excluded.updated_at > entries.updated_at"
            )) {
                Ok(stmt) => stmt,
                Err(e) if is_missing_conflict_target(&e) => {
                    return Err(RemoteStoreError::UpsertUnsupported)
                }
                Err(e) => return Err(e.into()),
            };

            for row in rows {
                stmt.execute(params![
                    id.0,
                    row.date,
                    row.emojis,
                    row.hue,
                    row.song_title,
                    row.song_artist,
                    row.updated_at,
                    row.synced_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_entry(&self, id: UserId, row: &EntryRow) -> Result<()> {
        self.conn()?.execute(
            &format!(
                "INSERT INTO entries (user_id, {ENTRY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                id.0,
                row.date,
                row.emojis,
                row.hue,
                row.song_title,
                row.song_artist,
                row.updated_at,
                row.synced_at,
            ],
        )?;
        Ok(())
    }

    fn update_entry(&self, id: UserId, row: &EntryRow) -> Result<()> {
        self.conn()?.execute(
            "UPDATE entries SET emojis = ?3, hue = ?4, song_title = ?5, song_artist = ?6,
                                updated_at = ?7, synced_at = ?8
             WHERE user_id = ?1 AND date = ?2 AND updated_at < ?7",
            params![
                id.0,
                row.date,
                row.emojis,
                row.hue,
                row.song_title,
                row.song_artist,
                row.updated_at,
                row.synced_at,
            ],
        )?;
        Ok(())
    }
}
