//! Id and hash helpers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a new UUID v7 (time-ordered).
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

/// Builds a time-ordered identifier such as `job-0190f1c3...`.
#[must_use]
pub fn prefixed_id(prefix: &str) -> String {
    format!("{prefix}-{}", generate_uuid_v7().simple())
}

/// Hex-encoded SHA-256 of the input.
#[must_use]
pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

/// Hex-encoded first 16 bytes of the SHA-256 of `components` joined by `:`.
#[must_use]
pub fn short_hash(components: &[&str]) -> String {
    let combined = components.join(":");
    let digest = Sha256::digest(combined.as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_id() {
        let id = prefixed_id("job");
        assert!(id.starts_with("job-"));
        assert_eq!(id.len(), "job-".len() + 32);
    }

    #[test]
    fn test_prefixed_ids_are_unique() {
        assert_ne!(prefixed_id("job"), prefixed_id("job"));
    }

    #[test]
    fn test_short_hash_is_deterministic() {
        let a = short_hash(&["web_prod", "1.2.0"]);
        let b = short_hash(&["web_prod", "1.2.0"]);
        let c = short_hash(&["web_prod", "1.2.1"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
