use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Envelope is not valid base64")]
    InvalidEncoding,

    #[error("Envelope too short: {0} bytes")]
    Truncated(usize),

    #[error("Decrypted field is not valid UTF-8")]
    InvalidUtf8,

    #[error("No encryption key configured")]
    NoKey,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity payload is empty")]
    MissingPayload,

    #[error("Identity payload has no hash field")]
    MissingHash,

    #[error("Identity payload hash is not valid hex")]
    InvalidHash,

    #[error("Identity payload signature mismatch")]
    SignatureMismatch,

    #[error("Identity payload has no usable user object")]
    InvalidUser,

    #[error("Invalid HMAC key")]
    InvalidKey,
}
