//! Subscriber key derivation.

use md5::{Digest, Md5};

/// Derive the subscriber key for an email address.
///
/// The list service identifies members by the MD5 hex digest of the
/// lower-cased email address. The same email always yields the same key,
/// which is what makes upserts idempotent across retried runs. This is an
/// identity key, not a security boundary.
#[must_use]
pub fn subscriber_key(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    let digest = Md5::digest(normalized.as_bytes());
    hex::encode(digest)
}
