//! AES-256-GCM sealing for secrets stored at rest
//!
//! Used for values that must be recoverable (unlike credential hashes), e.g.
//! session device fingerprints. Encoded as `enc:` + hex(nonce || ciphertext);
//! values without the prefix are treated as legacy plaintext.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use anyhow::{Context, Result};
use rand::RngCore;

/// Seal a plaintext value under the configured key.
///
/// Returns `enc:` + hex(nonce || ciphertext), or the plaintext unchanged when
/// no key is configured.
pub fn seal(key: Option<&[u8; 32]>, plaintext: &str) -> Result<String> {
    let Some(key) = key else {
        return Ok(plaintext.to_string());
    };

    let cipher = Aes256Gcm::new(key.into());

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

    let mut combined = Vec::with_capacity(12 + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(format!("enc:{}", hex::encode(combined)))
}

/// Open a sealed value.
///
/// Handles both sealed (`enc:...`) and legacy plaintext values.
pub fn open(key: Option<&[u8; 32]>, stored: &str) -> Result<String> {
    let Some(encrypted_hex) = stored.strip_prefix("enc:") else {
        return Ok(stored.to_string());
    };

    let Some(key) = key else {
        anyhow::bail!("sealed value but no API_KEY_ENCRYPTION_KEY configured");
    };

    let combined = hex::decode(encrypted_hex).context("invalid hex in sealed value")?;
    if combined.len() < 12 {
        anyhow::bail!("sealed value too short");
    }

    let (nonce_bytes, ciphertext) = combined.split_at(12);
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow::anyhow!("decryption failed: {e}"))?;

    String::from_utf8(plaintext).context("sealed value is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = [0x42u8; 32];
        let sealed = seal(Some(&key), "fingerprint-abc").unwrap();

        assert!(sealed.starts_with("enc:"));
        assert_ne!(sealed, "fingerprint-abc");
        assert_eq!(open(Some(&key), &sealed).unwrap(), "fingerprint-abc");
    }

    #[test]
    fn no_key_passes_through() {
        let sealed = seal(None, "value").unwrap();
        assert_eq!(sealed, "value");
        assert_eq!(open(None, "value").unwrap(), "value");
    }

    #[test]
    fn plaintext_passthrough_on_open() {
        let key = [0x42u8; 32];
        assert_eq!(open(Some(&key), "legacy-plain").unwrap(), "legacy-plain");
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = [0x42u8; 32];
        let key2 = [0x99u8; 32];
        let sealed = seal(Some(&key1), "secret").unwrap();
        assert!(open(Some(&key2), &sealed).is_err());
    }

    #[test]
    fn each_seal_produces_different_ciphertext() {
        let key = [0x42u8; 32];
        let a = seal(Some(&key), "same").unwrap();
        let b = seal(Some(&key), "same").unwrap();
        assert_ne!(a, b);
        assert_eq!(open(Some(&key), &a).unwrap(), "same");
        assert_eq!(open(Some(&key), &b).unwrap(), "same");
    }
}
