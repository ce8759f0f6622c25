//! Hashing utilities for hash-keyed directory names.
//!
//! Buildpack references are mapped to directory names (cache slots, download
//! destinations) by hashing the reference string. The hash is used for
//! addressing only; collisions between distinct references are not guarded
//! against.

use sha2::{Digest, Sha256};

use crate::consts::REF_KEY_LEN;

/// Hash arbitrary bytes.
///
/// Returns the full 64-character lowercase SHA256 hex digest.
pub fn hash_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

/// Directory name for a buildpack reference.
///
/// Derived solely from the reference string, truncated to `REF_KEY_LEN` hex
/// characters.
pub fn ref_key(reference: &str) -> String {
  let mut full = hash_bytes(reference.as_bytes());
  full.truncate(REF_KEY_LEN);
  full
}
