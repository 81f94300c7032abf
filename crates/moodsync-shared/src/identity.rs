//! Verification of signed identity payloads.
//!
//! The client forwards the payload it received from the messaging platform
//! untouched: a URL-encoded set of `key=value` pairs, one of which is a
//! `hash` over the others and one of which (`user`) carries a JSON profile.
//! The hash is an HMAC keyed by a secret derived from the bot token, so only
//! the platform (and this server) can produce it.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use url::form_urlencoded;

use crate::constants::WEB_APP_DATA_KEY;
use crate::error::IdentityError;
use crate::types::{IdentityProfile, UserId};

type HmacSha256 = Hmac<Sha256>;

const HASH_FIELD: &str = "hash";
const USER_FIELD: &str = "user";

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<[u8; 32], IdentityError> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| IdentityError::InvalidKey)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// A parsed, not yet verified, identity payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPayload {
    fields: BTreeMap<String, String>,
    hash: Option<String>,
}

impl IdentityPayload {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdentityError::MissingPayload);
        }

        let mut fields = BTreeMap::new();
        let mut hash = None;
        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            if key == HASH_FIELD {
                hash = Some(value.into_owned());
            } else {
                fields.insert(key.into_owned(), value.into_owned());
            }
        }

        Ok(Self { fields, hash })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Sorted `key=value` lines joined by `\n`, `hash` excluded.
    pub fn check_string(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn digest(&self, bot_token: &str) -> Result<[u8; 32], IdentityError> {
        let secret = hmac_sha256(WEB_APP_DATA_KEY, bot_token.as_bytes())?;
        hmac_sha256(&secret, self.check_string().as_bytes())
    }

    /// Check the payload hash against the bot token.
    pub fn verify(&self, bot_token: &str) -> Result<(), IdentityError> {
        let supplied = self.hash.as_deref().ok_or(IdentityError::MissingHash)?;
        let supplied = hex::decode(supplied.trim()).map_err(|_| IdentityError::InvalidHash)?;
        let computed = self.digest(bot_token)?;

        if supplied.len() != computed.len()
            || computed[..].ct_eq(&supplied[..]).unwrap_u8() != 1
        {
            return Err(IdentityError::SignatureMismatch);
        }
        Ok(())
    }

    /// Profile from the `user` field.
    pub fn profile(&self) -> Result<IdentityProfile, IdentityError> {
        let user: Value = self
            .get(USER_FIELD)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .ok_or(IdentityError::InvalidUser)?;

        let id = user
            .get("id")
            .and_then(Value::as_i64)
            .ok_or(IdentityError::InvalidUser)?;

        let text = |key: &str| {
            user.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(IdentityProfile {
            id: UserId(id),
            username: text("username"),
            first_name: text("first_name"),
            last_name: text("last_name"),
            language_code: text("language_code"),
        })
    }
}

/// Returns `true` only for a well-formed payload whose hash matches.
pub fn verify(payload: &str, bot_token: &str) -> bool {
    IdentityPayload::parse(payload)
        .and_then(|p| p.verify(bot_token))
        .is_ok()
}

/// Parse, verify and extract in one step.
pub fn verify_and_extract(
    payload: &str,
    bot_token: &str,
) -> Result<IdentityProfile, IdentityError> {
    let parsed = IdentityPayload::parse(payload)?;
    parsed.verify(bot_token)?;
    parsed.profile()
}

/// Profile from an (unverified) payload, `None` on any structural mismatch.
pub fn extract_identity(payload: &str) -> Option<IdentityProfile> {
    IdentityPayload::parse(payload).ok()?.profile().ok()
}

/// Build a signed payload the way the platform does. Used by tests and local
/// tooling that needs to talk to a server it shares a bot token with.
pub fn sign_payload(fields: &[(&str, &str)], bot_token: &str) -> Result<String, IdentityError> {
    let unsigned = IdentityPayload {
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        hash: None,
    };
    let digest = unsigned.digest(bot_token)?;

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        serializer.append_pair(key, value);
    }
    serializer.append_pair(HASH_FIELD, &hex::encode(digest));
    Ok(serializer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456:TEST-BOT-TOKEN";
    const USER: &str = r#"{"id":4242,"first_name":"Ada","username":"ada_l","language_code":"en"}"#;

    fn fields() -> Vec<(&'static str, &'static str)> {
        vec![
            ("auth_date", "1700000000"),
            ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
            ("user", USER),
        ]
    }

    #[test]
    fn test_valid_payload_verifies() {
        let payload = sign_payload(&fields(), TOKEN).unwrap();
        assert!(verify(&payload, TOKEN));
    }

    #[test]
    fn test_field_order_irrelevant() {
        let mut reversed = fields();
        reversed.reverse();
        let payload = sign_payload(&reversed, TOKEN).unwrap();
        assert!(verify(&payload, TOKEN));
    }

    #[test]
    fn test_any_single_char_flip_fails() {
        let base = fields();
        for (i, (_, value)) in base.iter().enumerate() {
            let signed = sign_payload(&base, TOKEN).unwrap();
            let parsed = IdentityPayload::parse(&signed).unwrap();
            let hash = parsed.hash.clone().unwrap();

            let mut flipped: Vec<char> = value.chars().collect();
            flipped[0] = if flipped[0] == 'x' { 'y' } else { 'x' };
            let flipped: String = flipped.into_iter().collect();

            let mut tampered: Vec<(&str, &str)> = base.clone();
            tampered[i].1 = &flipped;
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (k, v) in &tampered {
                serializer.append_pair(k, v);
            }
            serializer.append_pair("hash", &hash);

            assert!(!verify(&serializer.finish(), TOKEN), "flip in field {i} verified");
        }
    }

    #[test]
    fn test_wrong_token_fails() {
        let payload = sign_payload(&fields(), TOKEN).unwrap();
        assert!(!verify(&payload, "999:OTHER"));
    }

    #[test]
    fn test_missing_or_malformed_hash_rejected() {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in fields() {
            serializer.append_pair(k, v);
        }
        let unsigned = serializer.finish();
        assert!(!verify(&unsigned, TOKEN));
        assert_eq!(
            IdentityPayload::parse(&unsigned).unwrap().verify(TOKEN),
            Err(IdentityError::MissingHash)
        );

        assert!(!verify(&format!("{unsigned}&hash=zz-not-hex"), TOKEN));
        assert!(!verify(&format!("{unsigned}&hash=abcd"), TOKEN));
        assert!(!verify("", TOKEN));
        assert!(!verify("%%%", TOKEN));
    }

    #[test]
    fn test_check_string_sorted_without_hash() {
        let parsed = IdentityPayload::parse("b=2&hash=ff&a=1").unwrap();
        assert_eq!(parsed.check_string(), "a=1\nb=2");
    }

    #[test]
    fn test_extract_identity() {
        let payload = sign_payload(&fields(), TOKEN).unwrap();
        let profile = extract_identity(&payload).unwrap();
        assert_eq!(profile.id, UserId(4242));
        assert_eq!(profile.username.as_deref(), Some("ada_l"));
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(profile.last_name, None);
    }

    #[test]
    fn test_extract_identity_requires_numeric_id() {
        assert!(extract_identity("user=%7B%22id%22%3A%22abc%22%7D").is_none());
        assert!(extract_identity("user=not-json").is_none());
        assert!(extract_identity("auth_date=1").is_none());
    }

    #[test]
    fn test_verify_and_extract() {
        let payload = sign_payload(&fields(), TOKEN).unwrap();
        assert_eq!(verify_and_extract(&payload, TOKEN).unwrap().id, UserId(4242));
        assert_eq!(
            verify_and_extract(&payload, "nope"),
            Err(IdentityError::SignatureMismatch)
        );
    }
}
