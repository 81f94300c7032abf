//! Pull and push handlers.
//!
//! Sensitive fields (the emoji list, song title and song artist) are sealed
//! with the [`FieldCipher`] right before a row is written and opened one by
//! one when rows are read back, so a single bad field only blanks itself.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::{DateTime, SecondsFormat, Utc};
use moodsync_shared::constants::PUSH_BATCH_LIMIT;
use moodsync_shared::crypto::FieldCipher;
use moodsync_shared::error::CryptoError;
use moodsync_shared::merge::dedupe_latest;
use moodsync_shared::protocol::{PullRequest, PullResponse, PushRequest, PushResponse};
use moodsync_shared::sanitize::{normalize_song, sanitize_all, sanitize_entry, SanitizeOptions};
use moodsync_shared::types::{now_ms, Entry};

use crate::api::{json_body, with_store, AppState, Op};
use crate::error::ServerError;
use crate::remote::{EntryRow, RemoteStoreError};

/// Incremental pulls re-read this much history before the cursor, so a push
/// that committed while the previous pull was running is not skipped.
const PULL_OVERLAP_MS: i64 = 5_000;

pub async fn pull(
    State(state): State<AppState>,
    body: Result<Json<PullRequest>, JsonRejection>,
) -> Result<Json<PullResponse>, ServerError> {
    let req = json_body(body)?;
    let auth = state.authorize(req.init_data.as_deref(), Op::Pull).await?;

    let since_ms = req.since.as_deref().and_then(parse_cursor);
    let server_time = Utc::now();

    let id = auth.profile.id;
    let rows = with_store(auth.store, move |s| {
        s.fetch_entries(id, since_ms.map(|ms| ms - PULL_OVERLAP_MS))
    })
    .await?;

    let opts = SanitizeOptions::local(server_time.timestamp_millis());
    let entries: Vec<Entry> = rows
        .iter()
        .filter_map(|row| open_row(&state.cipher, row, &opts))
        .collect();

    tracing::debug!(user = %id, since = ?since_ms, count = entries.len(), "pull");

    Ok(Json(PullResponse {
        ok: true,
        entries,
        username: auth.user.and_then(|u| u.username),
        server_time: Some(server_time.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }))
}

pub async fn push(
    State(state): State<AppState>,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Json<PushResponse>, ServerError> {
    let req = json_body(body)?;
    let auth = state.authorize(req.init_data.as_deref(), Op::Push).await?;
    let id = auth.profile.id;

    let now = now_ms();
    let batch = &req.entries[..req.entries.len().min(PUSH_BATCH_LIMIT)];
    let received = batch.len();
    let candidates = dedupe_latest(sanitize_all(batch, &SanitizeOptions::server(now)));

    if candidates.is_empty() {
        return Ok(Json(PushResponse {
            ok: true,
            received,
            written: 0,
            skipped: received,
        }));
    }

    let dates: Vec<String> = candidates.iter().map(|e| e.date.clone()).collect();
    let stored = with_store(auth.store.clone(), move |s| s.fetch_updated_at(id, &dates)).await?;

    // (row, already stored) for every record strictly newer than its stored copy
    let mut writes = Vec::with_capacity(candidates.len());
    for entry in &candidates {
        let existing = stored.get(&entry.date).copied();
        if existing.map_or(true, |at| entry.updated_at > at) {
            let row = seal_entry(&state.cipher, entry, now)
                .map_err(|e| ServerError::Internal(format!("field encryption failed: {e}")))?;
            writes.push((row, existing.is_some()));
        }
    }

    let written = writes.len();
    if written > 0 {
        with_store(auth.store, move |s| {
            let rows: Vec<EntryRow> = writes.iter().map(|(row, _)| row.clone()).collect();
            match s.upsert_entries(id, &rows) {
                Err(RemoteStoreError::UpsertUnsupported) => {
                    tracing::debug!(user = %id, "batched upsert unsupported, writing row by row");
                    for (row, exists) in &writes {
                        if *exists {
                            s.update_entry(id, row)?;
                        } else {
                            s.insert_entry(id, row)?;
                        }
                    }
                    Ok(())
                }
                other => other,
            }
        })
        .await?;
    }

    tracing::debug!(user = %id, received, written, "push");

    Ok(Json(PushResponse {
        ok: true,
        received,
        written,
        skipped: received - written,
    }))
}

/// RFC 3339 cursor to epoch ms; anything unreadable means a full pull.
fn parse_cursor(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.timestamp_millis()),
        Err(e) => {
            tracing::debug!(cursor = raw, error = %e, "unreadable cursor, sending everything");
            None
        }
    }
}

pub(crate) fn seal_entry(
    cipher: &FieldCipher,
    entry: &Entry,
    synced_at: i64,
) -> Result<EntryRow, CryptoError> {
    let emojis = serde_json::to_string(&entry.emojis).map_err(|_| CryptoError::EncryptionFailed)?;
    let song = entry.song.as_ref();

    Ok(EntryRow {
        date: entry.date.clone(),
        emojis: cipher.encrypt(&emojis)?,
        hue: entry.hue,
        song_title: song
            .and_then(|s| s.title.as_deref())
            .map(|t| cipher.encrypt(t))
            .transpose()?,
        song_artist: song
            .and_then(|s| s.artist.as_deref())
            .map(|a| cipher.encrypt(a))
            .transpose()?,
        updated_at: entry.updated_at,
        synced_at,
    })
}

fn open_field(cipher: &FieldCipher, date: &str, field: &str, value: &str) -> String {
    cipher.decrypt_checked(value).unwrap_or_else(|e| {
        tracing::warn!(date, field, error = %e, "stored field could not be decrypted");
        String::new()
    })
}

/// Decrypt and re-sanitize a stored row. `None` only when the row itself is
/// unusable (a bad date).
pub(crate) fn open_row(cipher: &FieldCipher, row: &EntryRow, opts: &SanitizeOptions) -> Option<Entry> {
    let emojis_json = open_field(cipher, &row.date, "emojis", &row.emojis);
    let emojis: Vec<String> = if emojis_json.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&emojis_json).unwrap_or_else(|e| {
            tracing::warn!(date = %row.date, error = %e, "stored emojis are not a JSON list");
            Vec::new()
        })
    };

    let title = row
        .song_title
        .as_deref()
        .map(|v| open_field(cipher, &row.date, "song_title", v));
    let artist = row
        .song_artist
        .as_deref()
        .map(|v| open_field(cipher, &row.date, "song_artist", v));

    let entry = Entry {
        date: row.date.clone(),
        emojis,
        hue: row.hue,
        song: normalize_song(title.as_deref(), artist.as_deref()),
        updated_at: row.updated_at,
    };
    sanitize_entry(&entry, opts)
}
