use serde::{Deserialize, Serialize};

/// Numeric platform user id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional song attached to a diary day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Song {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
}

impl Song {
    pub fn is_empty(&self) -> bool {
        self.title.as_deref().map_or(true, str::is_empty)
            && self.artist.as_deref().map_or(true, str::is_empty)
    }
}

/// One diary entry; there is at most one per (identity, date).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Calendar date, `YYYY-MM-DD`. Natural key.
    pub date: String,
    /// Up to three distinct emojis, in insertion order.
    #[serde(default)]
    pub emojis: Vec<String>,
    /// Hue in degrees; only present when `emojis` is non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song: Option<Song>,
    /// Epoch milliseconds of the last edit. Sole conflict tiebreaker.
    pub updated_at: i64,
}

impl Entry {
    pub fn new(date: impl Into<String>, updated_at: i64) -> Self {
        Self {
            date: date.into(),
            emojis: Vec::new(),
            hue: None,
            song: None,
            updated_at,
        }
    }
}

/// Profile fields carried by a verified identity payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityProfile {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

/// Daily reminder preferences of an identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPrefs {
    #[serde(default)]
    pub enabled: bool,
    /// Local hour of day (0-23) the reminder fires at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u8>,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_wire_shape() {
        let entry = Entry {
            date: "2025-01-01".into(),
            emojis: vec!["😀".into()],
            hue: Some(10),
            song: None,
            updated_at: 100,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "date": "2025-01-01",
                "emojis": ["😀"],
                "hue": 10,
                "updatedAt": 100
            })
        );
    }

    #[test]
    fn test_song_is_empty() {
        assert!(Song::default().is_empty());
        assert!(Song { title: Some(String::new()), artist: None }.is_empty());
        assert!(!Song { title: None, artist: Some("Nina Simone".into()) }.is_empty());
    }
}
