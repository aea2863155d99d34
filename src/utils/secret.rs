//! Token generation and hashing utilities
//!
//! Opaque tokens (authorization codes, refresh tokens, session ids, `jti`
//! values) are high-entropy random strings hashed with SHA-256 for storage:
//! no salt is needed because the input space is uniform, and the digest can
//! be used directly as a lookup key. API keys and client secrets are the
//! exception: long-lived credentials, stored as salted PBKDF2-SHA512 and
//! looked up by prefix instead of by digest.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};

/// Entropy for opaque tokens: 48 random bytes before base64url encoding.
pub const TOKEN_BYTES: usize = 48;

/// PBKDF2-SHA512 iteration count for API-key hashes.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Per-record salt length for API-key hashes.
const SALT_BYTES: usize = 16;

/// Generate an opaque random token: 48 bytes of OS entropy, base64url encoded
/// without padding (64 characters).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash an opaque token with SHA-256 for storage and lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a full API key with the configured environment prefix, e.g.
/// `sk_live_` followed by 32 bytes of base64url entropy.
pub fn generate_api_key(prefix: &str) -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

/// The searchable prefix stored alongside an API-key hash: the first 12
/// characters of the full key.
pub fn api_key_prefix(key: &str) -> &str {
    &key[..12.min(key.len())]
}

/// Hash a long-lived secret (API key, client secret) with PBKDF2-SHA512 and
/// a per-record salt.
///
/// Encoded as `hex(salt):hex(derived)` so verification can recover the salt.
pub fn hash_secret(key: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut derived = [0u8; 64];
    pbkdf2_hmac::<Sha512>(key.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut derived);

    format!("{}:{}", hex::encode(salt), hex::encode(derived))
}

/// Verify a secret against a stored `salt:hash` record.
///
/// Returns `false` for malformed records rather than erroring: a record that
/// cannot be parsed can never authenticate.
pub fn verify_secret(key: &str, stored: &str) -> bool {
    let Some((salt_hex, hash_hex)) = stored.split_once(':') else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(hash_hex) else {
        return false;
    };
    if expected.len() != 64 {
        return false;
    }

    let mut derived = [0u8; 64];
    pbkdf2_hmac::<Sha512>(key.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut derived);

    constant_time_bytes_compare(&derived, &expected)
}

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let len = a.len().max(b.len());

    let mut result = 0u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        result |= x ^ y;
    }
    result == 0 && a.len() == b.len()
}

fn constant_time_bytes_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_length_and_charset() {
        let token = generate_token();
        // 48 bytes -> 64 base64url characters, no padding
        assert_eq!(token.len(), 64);
        for c in token.chars() {
            assert!(
                c.is_ascii_alphanumeric() || c == '-' || c == '_',
                "Token contains invalid character: {}",
                c
            );
        }
    }

    #[test]
    fn test_generate_token_uniqueness() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_hash_token_deterministic() {
        let token = "test_token_12345";
        assert_eq!(hash_token(token), hash_token(token));
    }

    #[test]
    fn test_hash_token_not_equal_to_plain_text() {
        let token = generate_token();
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn test_api_key_has_prefix() {
        let key = generate_api_key("sk_live_");
        assert!(key.starts_with("sk_live_"));
        assert_eq!(api_key_prefix(&key), &key[..12]);
    }

    #[test]
    fn test_hash_api_key_format() {
        let key = generate_api_key("sk_test_");
        let stored = hash_secret(&key);

        let (salt, hash) = stored.split_once(':').unwrap();
        assert_eq!(salt.len(), SALT_BYTES * 2);
        assert_eq!(hash.len(), 128); // 64 bytes hex encoded
    }

    #[test]
    fn test_hash_api_key_salted() {
        // Same key hashes differently thanks to the per-record salt,
        // but both records verify.
        let key = "sk_test_same_key";
        let h1 = hash_secret(key);
        let h2 = hash_secret(key);

        assert_ne!(h1, h2);
        assert!(verify_secret(key, &h1));
        assert!(verify_secret(key, &h2));
    }

    #[test]
    fn test_verify_api_key_wrong_key() {
        let key = generate_api_key("sk_live_");
        let stored = hash_secret(&key);

        assert!(!verify_secret(&generate_api_key("sk_live_"), &stored));
    }

    #[test]
    fn test_verify_api_key_malformed_record() {
        assert!(!verify_secret("anything", "no-separator"));
        assert!(!verify_secret("anything", "nothex:nothex"));
        assert!(!verify_secret("anything", "abcd:abcd"));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
        assert!(constant_time_compare("", ""));
    }
}
