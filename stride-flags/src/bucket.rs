//! Rollout bucketing.
//!
//! The algorithm is fixed and must never change, otherwise sessions would
//! move between buckets across releases:
//!
//! 1. `digest = SHA-256("{flag_name}.{session_id}")` over UTF-8 bytes
//! 2. `h = u64::from_be_bytes(digest[0..8])`
//! 3. `bucket = (h >> 11) / 2^53 * 100`, a value in `[0, 100)`
//!
//! Using the top 53 bits keeps the conversion to `f64` exact.

use sha2::{Digest, Sha256};

const MANTISSA_SCALE: f64 = (1u64 << 53) as f64;

/// Rollout bucket of a flag/session pair, in `[0, 100)`.
pub fn bucket(flag_name: &str, session_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(flag_name.as_bytes());
    hasher.update(b".");
    hasher.update(session_id.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let h = u64::from_be_bytes(prefix);

    ((h >> 11) as f64 / MANTISSA_SCALE) * 100.0
}
