//! JSON bodies exchanged between the sync client and the sync server.
//!
//! Every request is a POST whose body carries the signed identity payload in
//! `initData`. Successful responses carry `ok: true`; failures are always
//! `{ "ok": false, "error": <code> }` with a code from [`ErrorCode`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Entry, ReminderPrefs, UserId};

pub const PULL_PATH: &str = "/api/sync/pull";
pub const PUSH_PATH: &str = "/api/sync/push";
pub const AUTH_PATH: &str = "/api/auth";
pub const ME_PATH: &str = "/api/me";
pub const USERNAME_PATH: &str = "/api/username";
pub const DELETE_PATH: &str = "/api/delete";

/// Stable error codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    MissingIdentityPayload,
    InvalidSignature,
    InvalidUser,
    RateLimited,
    /// The identity no longer exists remotely (HTTP 410).
    UserMissing,
    DbError,
    ServerError,
    MethodNotAllowed,
    BadRequest,
    InvalidUsername,
    UsernameTaken,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingIdentityPayload => "missing-identity-payload",
            Self::InvalidSignature => "invalid-signature",
            Self::InvalidUser => "invalid-user",
            Self::RateLimited => "rate-limited",
            Self::UserMissing => "user-missing",
            Self::DbError => "db-error",
            Self::ServerError => "server-error",
            Self::MethodNotAllowed => "method-not-allowed",
            Self::BadRequest => "bad-request",
            Self::InvalidUsername => "invalid-username",
            Self::UsernameTaken => "username-taken",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: ErrorCode,
}

impl ErrorBody {
    pub fn new(error: ErrorCode) -> Self {
        Self { ok: false, error }
    }
}

// ─── Sync ───

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    #[serde(default)]
    pub init_data: Option<String>,
    /// RFC 3339 cursor; absent or empty means a full pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub ok: bool,
    pub entries: Vec<Entry>,
    #[serde(default)]
    pub username: Option<String>,
    /// Server clock at query time; the client stores it as its next cursor.
    #[serde(default)]
    pub server_time: Option<String>,
}

/// Push body. The server reads entries as loose JSON so that one malformed
/// record is dropped instead of failing the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest<E = Value> {
    #[serde(default)]
    pub init_data: Option<String>,
    #[serde(default = "Vec::new")]
    pub entries: Vec<E>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub ok: bool,
    /// Records considered (after the batch cap).
    pub received: usize,
    /// Records newer than the stored copy and written.
    pub written: usize,
    /// Records dropped by sanitization or by the newer-than-stored check.
    pub skipped: usize,
}

// ─── Identity ───

/// Body of requests that carry nothing but the identity payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRequest {
    #[serde(default)]
    pub init_data: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[serde(default)]
    pub init_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminders: Option<ReminderPrefs>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub timezone: String,
    pub reminders: ReminderPrefs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub ok: bool,
    pub user: Account,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeResponse {
    pub ok: bool,
    pub id: UserId,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameRequest {
    #[serde(default)]
    pub init_data: Option<String>,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsernameResponse {
    pub ok: bool,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub ok: bool,
    pub deleted: bool,
}
