use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use moodsync_shared::types::{IdentityProfile, ReminderPrefs, UserId};

use super::{EntryRow, RemoteStore, RemoteStoreError, Result, UserRecord};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, UserRecord>,
    entries: HashMap<UserId, BTreeMap<String, EntryRow>>,
}

/// [`RemoteStore`] kept in process memory.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    batch_upsert: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            batch_upsert: true,
        }
    }

    /// A store that rejects [`RemoteStore::upsert_entries`], like a backend
    /// missing the (user, date) unique index.
    #[cfg(test)]
    pub fn without_batch_upsert() -> Self {
        Self {
            batch_upsert: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| RemoteStoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl RemoteStore for MemoryStore {
    fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    fn get_user(&self, id: UserId) -> Result<Option<UserRecord>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    fn upsert_user(
        &self,
        profile: &IdentityProfile,
        timezone: Option<&str>,
        reminders: Option<&ReminderPrefs>,
    ) -> Result<UserRecord> {
        let mut inner = self.lock()?;
        let user = inner
            .users
            .entry(profile.id)
            .or_insert_with(|| UserRecord::new(profile));

        user.first_name = profile.first_name.clone();
        user.last_name = profile.last_name.clone();
        user.language_code = profile.language_code.clone();
        if let Some(tz) = timezone {
            user.timezone = tz.to_string();
        }
        if let Some(prefs) = reminders {
            user.reminders = prefs.clone();
        }
        Ok(user.clone())
    }

    fn find_user_id_by_username(&self, username: &str) -> Result<Option<UserId>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.username.as_deref() == Some(username))
            .map(|u| u.id))
    }

    fn set_username(&self, id: UserId, username: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let taken = inner
            .users
            .values()
            .any(|u| u.id != id && u.username.as_deref() == Some(username));
        if taken {
            return Err(RemoteStoreError::UsernameTaken);
        }
        if let Some(user) = inner.users.get_mut(&id) {
            user.username = Some(username.to_string());
        }
        Ok(())
    }

    fn delete_user(&self, id: UserId) -> Result<bool> {
        let mut inner = self.lock()?;
        inner.entries.remove(&id);
        Ok(inner.users.remove(&id).is_some())
    }

    fn fetch_entries(&self, id: UserId, since_ms: Option<i64>) -> Result<Vec<EntryRow>> {
        let inner = self.lock()?;
        let Some(rows) = inner.entries.get(&id) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .values()
            .filter(|row| since_ms.map_or(true, |since| row.synced_at > since))
            .cloned()
            .collect())
    }

    fn fetch_updated_at(&self, id: UserId, dates: &[String]) -> Result<HashMap<String, i64>> {
        let inner = self.lock()?;
        let Some(rows) = inner.entries.get(&id) else {
            return Ok(HashMap::new());
        };
        Ok(dates
            .iter()
            .filter_map(|date| rows.get(date).map(|row| (date.clone(), row.updated_at)))
            .collect())
    }

    fn upsert_entries(&self, id: UserId, rows: &[EntryRow]) -> Result<()> {
        if !self.batch_upsert {
            return Err(RemoteStoreError::UpsertUnsupported);
        }
        let mut inner = self.lock()?;
        let stored = inner.entries.entry(id).or_default();
        for row in rows {
            let newer = stored
                .get(&row.date)
                .map_or(true, |existing| row.updated_at > existing.updated_at);
            if newer {
                stored.insert(row.date.clone(), row.clone());
            }
        }
        Ok(())
    }

    fn insert_entry(&self, id: UserId, row: &EntryRow) -> Result<()> {
        let mut inner = self.lock()?;
        let stored = inner.entries.entry(id).or_default();
        if stored.contains_key(&row.date) {
            return Err(RemoteStoreError::Unavailable(format!(
                "entry {} already exists",
                row.date
            )));
        }
        stored.insert(row.date.clone(), row.clone());
        Ok(())
    }

    fn update_entry(&self, id: UserId, row: &EntryRow) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .entries
            .get_mut(&id)
            .and_then(|rows| rows.get_mut(&row.date))
        {
            if row.updated_at > existing.updated_at {
                *existing = row.clone();
            }
        }
        Ok(())
    }
}
