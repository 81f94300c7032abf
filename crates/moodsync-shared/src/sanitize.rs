//! Record sanitization shared by the local store (migration) and the server
//! (push validation).
//!
//! Bad input is repaired where that is unambiguous and dropped where it is
//! not: a record with an impossible date disappears, while an out-of-range hue
//! is wrapped and duplicate emojis are collapsed. One malformed record never
//! fails the batch it arrived in.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use crate::constants::{
    HUE_RANGE, MAX_EMOJIS, MAX_EMOJI_CHARS, MAX_FUTURE_SKEW_MS, MAX_SONG_ARTIST_CHARS,
    MAX_SONG_TITLE_CHARS,
};
use crate::types::{Entry, Song};

#[derive(Debug, Clone, Copy)]
pub struct SanitizeOptions {
    /// Substituted for missing timestamps.
    pub now_ms: i64,
    /// When set, timestamps further than this into the future are clamped to now.
    pub max_future_skew_ms: Option<i64>,
}

impl SanitizeOptions {
    /// Rules for records read back from local storage.
    pub fn local(now_ms: i64) -> Self {
        Self {
            now_ms,
            max_future_skew_ms: None,
        }
    }

    /// Rules for records arriving from a client.
    pub fn server(now_ms: i64) -> Self {
        Self {
            now_ms,
            max_future_skew_ms: Some(MAX_FUTURE_SKEW_MS),
        }
    }
}

/// `YYYY-MM-DD` naming a real calendar day.
pub fn is_valid_date(date: &str) -> bool {
    date.len() == 10 && NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

/// Wrap any hue into `0..360`.
pub fn wrap_hue(hue: i64) -> u16 {
    hue.rem_euclid(HUE_RANGE) as u16
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Trim, drop empty or oversized tokens, dedupe preserving order, cap at three.
pub fn normalize_emojis<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(MAX_EMOJIS);
    for emoji in raw {
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_CHARS {
            continue;
        }
        if out.iter().any(|e| e == emoji) {
            continue;
        }
        out.push(emoji.to_string());
        if out.len() == MAX_EMOJIS {
            break;
        }
    }
    out
}

/// Trim and cap both fields; `None` when nothing is left.
pub fn normalize_song(title: Option<&str>, artist: Option<&str>) -> Option<Song> {
    let clean = |v: Option<&str>, max: usize| {
        v.map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| truncate_chars(v, max))
    };
    let song = Song {
        title: clean(title, MAX_SONG_TITLE_CHARS),
        artist: clean(artist, MAX_SONG_ARTIST_CHARS),
    };
    (!song.is_empty()).then_some(song)
}

fn clamp_timestamp(raw: Option<i64>, opts: &SanitizeOptions) -> i64 {
    let ts = raw.filter(|ts| *ts > 0).unwrap_or(opts.now_ms);
    match opts.max_future_skew_ms {
        Some(skew) if ts > opts.now_ms + skew => opts.now_ms,
        _ => ts,
    }
}

fn assemble(
    date: &str,
    emojis: Vec<String>,
    hue: Option<i64>,
    song: Option<Song>,
    updated_at: Option<i64>,
    opts: &SanitizeOptions,
) -> Option<Entry> {
    if !is_valid_date(date) {
        return None;
    }
    let hue = if emojis.is_empty() {
        None
    } else {
        hue.map(wrap_hue)
    };
    Some(Entry {
        date: date.to_string(),
        emojis,
        hue,
        song,
        updated_at: clamp_timestamp(updated_at, opts),
    })
}

/// Re-apply every invariant to an already typed entry.
pub fn sanitize_entry(entry: &Entry, opts: &SanitizeOptions) -> Option<Entry> {
    let emojis = normalize_emojis(entry.emojis.iter().map(String::as_str));
    let song = entry
        .song
        .as_ref()
        .and_then(|s| normalize_song(s.title.as_deref(), s.artist.as_deref()));
    assemble(
        &entry.date,
        emojis,
        entry.hue.map(i64::from),
        song,
        Some(entry.updated_at),
        opts,
    )
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn timestamp_like(value: &Value) -> Option<i64> {
    if let Some(n) = number_like(value) {
        return Some(n as i64);
    }
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.timestamp_millis())
}

/// Sanitize one loosely typed record (legacy storage or an untrusted push).
pub fn sanitize_value(raw: &Value, opts: &SanitizeOptions) -> Option<Entry> {
    let obj = raw.as_object()?;
    let date = obj.get("date")?.as_str()?.trim();

    let emojis = match obj.get("emojis") {
        Some(Value::Array(items)) => normalize_emojis(items.iter().filter_map(Value::as_str)),
        // older records carried a single emoji
        _ => obj
            .get("emoji")
            .and_then(Value::as_str)
            .map(|e| normalize_emojis([e]))
            .unwrap_or_default(),
    };

    let hue = obj
        .get("hue")
        .and_then(number_like)
        .map(|h| h.round() as i64);

    let song = obj.get("song").and_then(Value::as_object).and_then(|song| {
        normalize_song(
            song.get("title").and_then(Value::as_str),
            song.get("artist").and_then(Value::as_str),
        )
    });

    let updated_at = obj
        .get("updatedAt")
        .or_else(|| obj.get("updated_at"))
        .and_then(timestamp_like);

    assemble(date, emojis, hue, song, updated_at, opts)
}

/// Normalize a username: trim, strip one leading `@`, lowercase. `None` unless
/// the result is 3-32 chars of `[a-z0-9_]`.
pub fn normalize_username(raw: &str) -> Option<String> {
    let name = raw.trim();
    let name = name.strip_prefix('@').unwrap_or(name).to_lowercase();
    let valid = (3..=32).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    valid.then_some(name)
}

/// Sanitize a batch, silently dropping records that cannot be repaired.
pub fn sanitize_all<'a>(
    raws: impl IntoIterator<Item = &'a Value>,
    opts: &SanitizeOptions,
) -> Vec<Entry> {
    raws.into_iter()
        .filter_map(|raw| sanitize_value(raw, opts))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn local() -> SanitizeOptions {
        SanitizeOptions::local(NOW)
    }

    #[test]
    fn test_hue_wrapped_and_emojis_deduped() {
        let raw = json!({
            "date": "2025-01-01",
            "emojis": ["😀", "😀", "🔥", "🔥"],
            "hue": 420,
            "updatedAt": 5
        });
        let entry = sanitize_value(&raw, &local()).unwrap();
        assert_eq!(entry.emojis, vec!["😀", "🔥"]);
        assert_eq!(entry.hue, Some(60));
        assert_eq!(entry.updated_at, 5);
    }

    #[test]
    fn test_bad_dates_dropped() {
        for date in ["bad-date", "2025-02-30", "2025-1-01", "", "2025-01-01T00:00"] {
            let raw = json!({ "date": date, "emojis": ["😀"], "updatedAt": 1 });
            assert!(sanitize_value(&raw, &local()).is_none(), "{date} accepted");
        }
        assert!(sanitize_value(&json!({ "emojis": ["😀"] }), &local()).is_none());
        assert!(sanitize_value(&json!("2025-01-01"), &local()).is_none());
    }

    #[test]
    fn test_hue_dropped_without_emojis() {
        let raw = json!({ "date": "2025-01-01", "emojis": [], "hue": 200, "updatedAt": 1 });
        let entry = sanitize_value(&raw, &local()).unwrap();
        assert!(entry.emojis.is_empty());
        assert_eq!(entry.hue, None);

        let blanks = json!({ "date": "2025-01-01", "emojis": ["  ", ""], "hue": 200 });
        assert_eq!(sanitize_value(&blanks, &local()).unwrap().hue, None);
    }

    #[test]
    fn test_emojis_capped_at_three() {
        let raw = json!({ "date": "2025-01-01", "emojis": ["a", "b", "a", "c", "d"] });
        let entry = sanitize_value(&raw, &local()).unwrap();
        assert_eq!(entry.emojis, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_negative_and_fractional_hue() {
        assert_eq!(wrap_hue(-30), 330);
        assert_eq!(wrap_hue(360), 0);
        let raw = json!({ "date": "2025-01-01", "emojis": ["😀"], "hue": 59.6 });
        assert_eq!(sanitize_value(&raw, &local()).unwrap().hue, Some(60));
    }

    #[test]
    fn test_song_trimmed_capped_and_dropped() {
        let raw = json!({
            "date": "2025-01-01",
            "song": { "title": format!("  {}  ", "t".repeat(60)), "artist": "  Björk " }
        });
        let song = sanitize_value(&raw, &local()).unwrap().song.unwrap();
        assert_eq!(song.title.unwrap().chars().count(), MAX_SONG_TITLE_CHARS);
        assert_eq!(song.artist.as_deref(), Some("Björk"));

        let empty = json!({ "date": "2025-01-01", "song": { "title": " ", "artist": "" } });
        assert!(sanitize_value(&empty, &local()).unwrap().song.is_none());
    }

    #[test]
    fn test_missing_timestamp_defaults_to_now() {
        let raw = json!({ "date": "2025-01-01", "emojis": ["😀"] });
        assert_eq!(sanitize_value(&raw, &local()).unwrap().updated_at, NOW);
    }

    #[test]
    fn test_future_timestamp_clamped_on_server_only() {
        let far = NOW + MAX_FUTURE_SKEW_MS + 1;
        let raw = json!({ "date": "2025-01-01", "updatedAt": far });
        assert_eq!(sanitize_value(&raw, &local()).unwrap().updated_at, far);
        assert_eq!(
            sanitize_value(&raw, &SanitizeOptions::server(NOW))
                .unwrap()
                .updated_at,
            NOW
        );

        let near = json!({ "date": "2025-01-01", "updatedAt": NOW + 1000 });
        assert_eq!(
            sanitize_value(&near, &SanitizeOptions::server(NOW))
                .unwrap()
                .updated_at,
            NOW + 1000
        );
    }

    #[test]
    fn test_legacy_shapes() {
        let raw = json!({ "date": "2024-12-31", "emoji": "🌧", "hue": "200", "updated_at": 42 });
        let entry = sanitize_value(&raw, &local()).unwrap();
        assert_eq!(entry.emojis, vec!["🌧"]);
        assert_eq!(entry.hue, Some(200));
        assert_eq!(entry.updated_at, 42);

        let iso = json!({ "date": "2024-12-31", "updatedAt": "2024-12-31T10:00:00Z" });
        assert_eq!(
            sanitize_value(&iso, &local()).unwrap().updated_at,
            1_735_639_200_000
        );
    }

    #[test]
    fn test_sanitize_typed_entry() {
        let entry = Entry {
            date: "2025-03-01".into(),
            emojis: vec!["😀".into(), "😀".into()],
            hue: Some(359),
            song: Some(Song { title: Some("  ".into()), artist: None }),
            updated_at: 7,
        };
        let clean = sanitize_entry(&entry, &local()).unwrap();
        assert_eq!(clean.emojis, vec!["😀"]);
        assert_eq!(clean.hue, Some(359));
        assert!(clean.song.is_none());
    }

    #[test]
    fn test_normalize_username() {
        assert_eq!(normalize_username("  @Ada_L "), Some("ada_l".into()));
        assert_eq!(normalize_username("ab"), None);
        assert_eq!(normalize_username("has space"), None);
        assert_eq!(normalize_username("émile"), None);
        assert_eq!(normalize_username(&"a".repeat(33)), None);
    }

    #[test]
    fn test_sanitize_all_keeps_good_records() {
        let raws = vec![
            json!({ "date": "2025-01-01", "emojis": ["😀"] }),
            json!({ "date": "nope" }),
            json!(17),
            json!({ "date": "2025-01-02" }),
        ];
        let out = sanitize_all(&raws, &local());
        assert_eq!(out.len(), 2);
    }
}
