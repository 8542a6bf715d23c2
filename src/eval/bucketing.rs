//! Deterministic percentage bucketing.
//!
//! A user lands in a bucket `0..100` derived from the setting key and the
//! bucketing attribute's text rendering. The same (key, attribute) pair always
//! produces the same bucket, and distributions are independent between
//! settings because the setting key participates in the hash.
use sha1::{Digest, Sha1};

/// Bucket for the given setting key and attribute text, in `0..100`.
pub(crate) fn bucket(setting_key: &str, attribute_text: &str) -> u8 {
    let mut hasher = Sha1::new();
    hasher.update(setting_key.as_bytes());
    hasher.update(attribute_text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    // 7 hex digits fit comfortably in a u32.
    let value = u32::from_str_radix(&digest[..7], 16).expect("hex digest parses as hex");
    (value % 100) as u8
}
