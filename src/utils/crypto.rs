//! Hashing helpers

use sha2::{Digest, Sha256};

/// SHA-256 of a string, hex-encoded
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 over raw bytes, hex-encoded
pub fn sha256_hex_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digest of a presented credential. The plaintext is never stored or logged;
/// every cache and rate-limit key derives from this value.
pub fn credential_digest(credential: &str) -> String {
    sha256_hex(credential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vectors() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_credential_digest_is_stable() {
        let a = credential_digest("fl_test_key_123");
        let b = credential_digest("fl_test_key_123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, credential_digest("fl_test_key_124"));
    }

    #[test]
    fn test_bytes_and_str_agree() {
        assert_eq!(sha256_hex("abc"), sha256_hex_bytes(b"abc"));
    }
}
