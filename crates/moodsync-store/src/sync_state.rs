//! Sync metadata kept next to the entries: the pull cursor, whether sync is
//! switched on, and the last username the server reported.

use crate::database::Database;
use crate::error::Result;

const CURSOR_KEY: &str = "moodsync.sync.cursor";
const ENABLED_KEY: &str = "moodsync.sync.enabled";
const USERNAME_KEY: &str = "moodsync.sync.username";

impl Database {
    /// RFC 3339 timestamp of the last fully applied pull.
    pub fn sync_cursor(&self) -> Result<Option<String>> {
        Ok(self.kv_get(CURSOR_KEY)?.filter(|c| !c.is_empty()))
    }

    pub fn set_sync_cursor(&self, cursor: &str) -> Result<()> {
        self.kv_set(CURSOR_KEY, cursor)
    }

    pub fn clear_sync_cursor(&self) -> Result<()> {
        self.kv_delete(CURSOR_KEY)?;
        Ok(())
    }

    /// Defaults to off until the user opts in.
    pub fn sync_enabled(&self) -> Result<bool> {
        Ok(self.kv_get(ENABLED_KEY)?.as_deref() == Some("1"))
    }

    pub fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        self.kv_set(ENABLED_KEY, if enabled { "1" } else { "0" })
    }

    pub fn cached_username(&self) -> Result<Option<String>> {
        self.kv_get(USERNAME_KEY)
    }

    /// Store the username, or forget it when `None`.
    pub fn set_cached_username(&self, username: Option<&str>) -> Result<()> {
        match username {
            Some(name) => self.kv_set(USERNAME_KEY, name),
            None => self.kv_delete(USERNAME_KEY).map(|_| ()),
        }
    }

    /// Forget everything stored locally: entries, cursor, flags.
    pub fn wipe_local(&self) -> Result<()> {
        self.conn().execute("DELETE FROM kv", [])?;
        tracing::info!("local store wiped");
        Ok(())
    }
}
