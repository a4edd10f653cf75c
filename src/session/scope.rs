//! Scope keys and API keys.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Deterministic namespace for a principal: the first 8 bytes of
/// SHA-256 over the trimmed, lowercased identity, hex-encoded.
///
/// Used for cache key prefixes and mirror file names.
pub fn scope_key(principal: &str) -> String {
    let normalized = principal.trim().to_lowercase();
    let hash = Sha256::digest(normalized.as_bytes());
    hex::encode(&hash[..8]) // 8 bytes = 16 hex chars
}

/// Random opaque token handed to HTTP clients after login.
pub fn generate_api_key() -> String {
    let mut rng = rand::rng();
    (0..40)
        .map(|_| {
            let idx = rng.random_range(0..36);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect()
}
