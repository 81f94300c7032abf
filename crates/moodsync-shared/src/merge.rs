//! Last-write-wins reconciliation of two entry sets.
//!
//! Conflicts are decided solely by `updated_at`, a client-supplied wall clock
//! timestamp. Devices with skewed clocks can therefore lose a genuinely newer
//! edit to an older one stamped by a fast clock; there is no causal tracking.

use std::collections::{BTreeMap, HashMap};

use crate::types::Entry;

/// Merge `incoming` into `local`.
///
/// An incoming record replaces the local one for the same date only when its
/// `updated_at` is strictly greater; ties keep the local record. The result
/// is sorted by date ascending. If `incoming` holds several records for one
/// date, pass it through [`dedupe_latest`] first.
pub fn merge(local: &[Entry], incoming: &[Entry]) -> Vec<Entry> {
    let mut by_date: BTreeMap<&str, &Entry> =
        local.iter().map(|e| (e.date.as_str(), e)).collect();

    for entry in incoming {
        let newer = by_date
            .get(entry.date.as_str())
            .map_or(true, |existing| entry.updated_at > existing.updated_at);
        if newer {
            by_date.insert(entry.date.as_str(), entry);
        }
    }

    by_date.into_values().cloned().collect()
}

/// Collapse duplicate dates, keeping the record with the greatest
/// `updated_at` (the first one seen among equals). Output keeps the order in
/// which each date first appeared.
pub fn dedupe_latest(entries: Vec<Entry>) -> Vec<Entry> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(entries.len());
    let mut out: Vec<Entry> = Vec::with_capacity(entries.len());

    for entry in entries {
        match index.get(&entry.date) {
            Some(&i) => {
                if entry.updated_at > out[i].updated_at {
                    out[i] = entry;
                }
            }
            None => {
                index.insert(entry.date.clone(), out.len());
                out.push(entry);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(date: &str, hue: u16, updated_at: i64) -> Entry {
        Entry {
            date: date.into(),
            emojis: vec!["😀".into()],
            hue: Some(hue),
            song: None,
            updated_at,
        }
    }

    #[test]
    fn test_newer_incoming_wins() {
        let local = vec![entry("2025-01-01", 10, 1)];
        let incoming = vec![entry("2025-01-01", 50, 2)];
        assert_eq!(merge(&local, &incoming), incoming);
    }

    #[test]
    fn test_older_incoming_loses() {
        let local = vec![entry("2025-01-01", 10, 2)];
        let incoming = vec![entry("2025-01-01", 50, 1)];
        assert_eq!(merge(&local, &incoming), local);
    }

    #[test]
    fn test_tie_keeps_local() {
        let local = vec![entry("2025-01-01", 10, 5)];
        let incoming = vec![entry("2025-01-01", 50, 5)];
        assert_eq!(merge(&local, &incoming), local);
    }

    #[test]
    fn test_merge_idempotent() {
        let set = vec![
            entry("2025-01-01", 10, 1),
            entry("2025-01-03", 30, 3),
            entry("2025-01-02", 20, 2),
        ];
        let once = merge(&set, &set);
        assert_eq!(merge(&once, &once), once);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_union_sorted_by_date() {
        let local = vec![entry("2025-01-03", 30, 3), entry("2025-01-01", 10, 1)];
        let incoming = vec![entry("2025-01-02", 20, 2)];
        let merged = merge(&local, &incoming);
        let dates: Vec<_> = merged.iter().map(|e| e.date.as_str()).collect();
        assert_eq!(dates, ["2025-01-01", "2025-01-02", "2025-01-03"]);
    }

    #[test]
    fn test_incoming_scan_order_irrelevant_after_dedupe() {
        let local = vec![entry("2025-01-01", 10, 1)];
        let a = entry("2025-01-01", 20, 4);
        let b = entry("2025-01-01", 30, 3);

        let forward = merge(&local, &dedupe_latest(vec![a.clone(), b.clone()]));
        let backward = merge(&local, &dedupe_latest(vec![b, a.clone()]));
        assert_eq!(forward, backward);
        assert_eq!(forward, vec![a]);
    }

    #[test]
    fn test_dedupe_latest_keeps_max() {
        let out = dedupe_latest(vec![
            entry("2025-01-02", 1, 1),
            entry("2025-01-01", 2, 9),
            entry("2025-01-02", 3, 7),
            entry("2025-01-02", 4, 7),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].hue, Some(3));
        assert_eq!(out[1].hue, Some(2));
    }
}
