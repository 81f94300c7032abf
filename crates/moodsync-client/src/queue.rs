//! Pending uploads, at most one per date.

use std::collections::BTreeMap;

use moodsync_shared::types::Entry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPush {
    pub entry: Entry,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

#[derive(Debug, Default)]
pub struct PushQueue {
    items: BTreeMap<String, PendingPush>,
}

impl PushQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Queue a fresh edit. A pending item for the same date is replaced and
    /// its attempt count starts over.
    pub fn replace(&mut self, entry: Entry) {
        self.items.insert(
            entry.date.clone(),
            PendingPush { entry, attempts: 0 },
        );
    }

    /// Take up to `limit` items, oldest date first.
    pub fn drain_batch(&mut self, limit: usize) -> Vec<PendingPush> {
        let dates: Vec<String> = self.items.keys().take(limit).cloned().collect();
        dates
            .into_iter()
            .filter_map(|date| self.items.remove(&date))
            .collect()
    }

    /// Put a failed batch back with one more attempt counted. Items whose
    /// date was edited again meanwhile are superseded and skipped; items that
    /// reach `max_attempts` are dropped. Returns how many were dropped.
    pub fn requeue_failed(&mut self, batch: Vec<PendingPush>, max_attempts: u32) -> usize {
        let mut dropped = 0;
        for mut item in batch {
            if self.items.contains_key(&item.entry.date) {
                continue;
            }
            item.attempts += 1;
            if item.attempts >= max_attempts {
                tracing::warn!(
                    date = %item.entry.date,
                    attempts = item.attempts,
                    "giving up on entry upload"
                );
                dropped += 1;
                continue;
            }
            self.items.insert(item.entry.date.clone(), item);
        }
        dropped
    }

    pub fn get(&self, date: &str) -> Option<&PendingPush> {
        self.items.get(date)
    }
}
