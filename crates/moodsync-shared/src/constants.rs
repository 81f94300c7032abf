/// Maximum number of emojis kept on one entry
pub const MAX_EMOJIS: usize = 3;

/// Longest single emoji token accepted (in chars); longer tokens are dropped
pub const MAX_EMOJI_CHARS: usize = 16;

/// Hue values are wrapped into `0..HUE_RANGE`
pub const HUE_RANGE: i64 = 360;

/// Song title cap (in chars)
pub const MAX_SONG_TITLE_CHARS: usize = 48;

/// Song artist cap (in chars)
pub const MAX_SONG_ARTIST_CHARS: usize = 40;

/// Maximum number of records the server accepts in one push request
pub const PUSH_BATCH_LIMIT: usize = 50;

/// How far in the future a pushed `updatedAt` may be before it is clamped to now
pub const MAX_FUTURE_SKEW_MS: i64 = 5 * 60 * 1000;

/// Version tag of the encrypted field envelope
pub const ENVELOPE_PREFIX: &str = "v1:";

/// AES-256-GCM IV size in bytes
pub const IV_SIZE: usize = 12;

/// AES-256-GCM authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// HMAC key used to derive the identity-payload secret from the bot token
pub const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";

/// Current version of the persisted local entry blob
pub const LOCAL_STORE_VERSION: u32 = 2;
