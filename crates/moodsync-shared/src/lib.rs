//! # moodsync-shared
//!
//! Types and algorithms shared by the moodsync client, store and server:
//! the diary [`Entry`](types::Entry) model and its sanitizer, last-write-wins
//! [`merge`](merge::merge), the versioned [`FieldCipher`](crypto::FieldCipher),
//! verification of signed identity payloads, and the JSON wire protocol.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod merge;
pub mod protocol;
pub mod sanitize;
pub mod types;
