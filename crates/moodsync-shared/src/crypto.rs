//! Field-level encryption for entry data at rest.
//!
//! Every sensitive field is stored as a self-describing envelope:
//! `"v1:" + base64(iv || tag || ciphertext)`. Values without the version
//! prefix are legacy plaintext and pass through decryption untouched, so old
//! and new rows can live side by side while a key is being rolled out.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::constants::{ENVELOPE_PREFIX, IV_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// SHA-256 of the operator passphrase.
pub fn derive_key_from_passphrase(passphrase: &str) -> SymmetricKey {
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&digest);
    key
}

/// Returns true if `value` carries the envelope version prefix.
pub fn is_envelope(value: &str) -> bool {
    value.starts_with(ENVELOPE_PREFIX)
}

/// Versioned AES-256-GCM cipher for individual string fields.
///
/// Without a key the cipher runs in pass-through mode: `encrypt` returns its
/// input unchanged. That mode is a deliberate deployment choice, visible
/// through [`FieldCipher::is_enabled`], and never reported as an error.
/// `decrypt` still passes plain values through in that mode, but a `v1:`
/// envelope it cannot open yields `""` rather than the raw ciphertext.
#[derive(Clone, Default)]
pub struct FieldCipher {
    key: Option<SymmetricKey>,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl FieldCipher {
    pub fn new(key: SymmetricKey) -> Self {
        Self { key: Some(key) }
    }

    /// Pass-through cipher.
    pub fn disabled() -> Self {
        Self { key: None }
    }

    /// Build from an optional passphrase; blank passphrases disable encryption.
    pub fn from_passphrase(passphrase: Option<&str>) -> Self {
        match passphrase.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => Self::new(derive_key_from_passphrase(p)),
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let Some(key) = self.key.as_ref() else {
            return Ok(plaintext.to_string());
        };

        let cipher = Aes256Gcm::new(key.into());
        let iv = generate_iv();
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut raw = Vec::with_capacity(IV_SIZE + TAG_SIZE + buffer.len());
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(tag.as_slice());
        raw.extend_from_slice(&buffer);

        Ok(format!("{ENVELOPE_PREFIX}{}", STANDARD.encode(raw)))
    }

    /// Decrypt with a typed failure.
    pub fn decrypt_checked(&self, value: &str) -> Result<String, CryptoError> {
        let Some(encoded) = value.strip_prefix(ENVELOPE_PREFIX) else {
            return Ok(value.to_string());
        };
        let key = self.key.as_ref().ok_or(CryptoError::NoKey)?;

        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidEncoding)?;
        if raw.len() < IV_SIZE + TAG_SIZE {
            return Err(CryptoError::Truncated(raw.len()));
        }

        let (iv, rest) = raw.split_at(IV_SIZE);
        let (tag, ciphertext) = rest.split_at(TAG_SIZE);
        let cipher = Aes256Gcm::new(key.into());
        let mut buffer = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(iv),
                b"",
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(buffer).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// Decrypt, degrading any failure to an empty string.
    pub fn decrypt(&self, value: &str) -> String {
        self.decrypt_checked(value).unwrap_or_default()
    }
}
