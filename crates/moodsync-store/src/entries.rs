//! Persistence of the diary entry set.
//!
//! The whole set lives in one JSON blob `{ "version": 2, "entries": [...] }`
//! under [`ENTRIES_KEY`]. Blobs written by older builds (a raw array, or a
//! lower `version`) and blobs under the legacy keys are sanitized, merged and
//! rewritten in the current shape the first time they are loaded.

use moodsync_shared::constants::LOCAL_STORE_VERSION;
use moodsync_shared::merge::{dedupe_latest, merge};
use moodsync_shared::sanitize::{sanitize_all, SanitizeOptions};
use moodsync_shared::types::{now_ms, Entry};
use serde::Serialize;
use serde_json::Value;

use crate::database::Database;
use crate::error::Result;

pub const ENTRIES_KEY: &str = "moodsync.entries.v2";

/// Keys used by earlier releases, oldest first.
pub const LEGACY_ENTRY_KEYS: [&str; 2] = ["moodsync.entries", "moodsync.entries.v1"];

#[derive(Serialize)]
struct StoredEntries<'a> {
    version: u32,
    entries: &'a [Entry],
}

/// A decoded blob: the version it was written with and its raw records.
struct Payload<'a> {
    version: u32,
    records: &'a [Value],
}

fn decode_payload(value: &Value) -> Option<Payload<'_>> {
    match value {
        Value::Array(records) => Some(Payload {
            version: 0,
            records,
        }),
        Value::Object(obj) => {
            let records = obj.get("entries")?.as_array()?;
            let version = obj
                .get("version")
                .and_then(Value::as_u64)
                .map_or(1, |v| u32::try_from(v).unwrap_or(u32::MAX));
            Some(Payload { version, records })
        }
        _ => None,
    }
}

/// Parse and sanitize one stored blob. `None` when it is not JSON or not a
/// recognizable entry container.
fn read_blob(key: &str, raw: &str, opts: &SanitizeOptions) -> Option<(u32, Vec<Entry>)> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key, error = %e, "stored entries are not valid JSON, ignoring");
            return None;
        }
    };
    let Some(payload) = decode_payload(&value) else {
        tracing::warn!(key, "stored entries have an unknown shape, ignoring");
        return None;
    };

    let mut entries = dedupe_latest(sanitize_all(payload.records, opts));
    entries.sort_by(|a, b| a.date.cmp(&b.date));
    Some((payload.version, entries))
}

impl Database {
    /// Load the entry set, migrating older formats on the way.
    ///
    /// An unreadable blob is logged and treated as empty; only SQLite failures
    /// are returned as errors.
    pub fn load_entries(&self) -> Result<Vec<Entry>> {
        let opts = SanitizeOptions::local(now_ms());
        let mut dirty = false;

        let mut entries = match self.kv_get(ENTRIES_KEY)? {
            Some(raw) => match read_blob(ENTRIES_KEY, &raw, &opts) {
                Some((version, entries)) => {
                    if version < LOCAL_STORE_VERSION {
                        tracing::info!(from = version, "migrating stored entries");
                        dirty = true;
                    }
                    entries
                }
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        let mut legacy_found = Vec::new();
        for key in LEGACY_ENTRY_KEYS {
            let Some(raw) = self.kv_get(key)? else {
                continue;
            };
            legacy_found.push(key);
            if let Some((_, incoming)) = read_blob(key, &raw, &opts) {
                tracing::info!(key, count = incoming.len(), "migrating legacy entries");
                entries = merge(&entries, &incoming);
            }
        }

        if dirty || !legacy_found.is_empty() {
            self.save_entries(&entries)?;
            for key in legacy_found {
                self.kv_delete(key)?;
            }
        }

        Ok(entries)
    }

    /// Replace the stored entry set.
    pub fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        let blob = serde_json::to_string(&StoredEntries {
            version: LOCAL_STORE_VERSION,
            entries,
        })?;
        self.kv_set(ENTRIES_KEY, &blob)
    }

    /// Insert or replace one entry and persist. Returns the new set.
    pub fn upsert_and_save(&self, entry: Entry) -> Result<Vec<Entry>> {
        let entries = upsert_entry(self.load_entries()?, entry);
        self.save_entries(&entries)?;
        Ok(entries)
    }

    /// Remove every stored entry, legacy copies included.
    pub fn wipe_entries(&self) -> Result<()> {
        self.kv_delete(ENTRIES_KEY)?;
        for key in LEGACY_ENTRY_KEYS {
            self.kv_delete(key)?;
        }
        Ok(())
    }
}

/// Replace the entry with the same date, or insert it, keeping date order.
pub fn upsert_entry(mut entries: Vec<Entry>, entry: Entry) -> Vec<Entry> {
    match entries.binary_search_by(|e| e.date.as_str().cmp(entry.date.as_str())) {
        Ok(i) => entries[i] = entry,
        Err(i) => entries.insert(i, entry),
    }
    entries
}
