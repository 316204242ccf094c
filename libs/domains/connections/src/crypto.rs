//! Token vault: AES-256-GCM encryption of provider tokens at rest.
//!
//! Envelope layout: `v1:` followed by URL-safe base64 (no padding) of
//! `nonce (12 bytes) || ciphertext || tag`. Every call to [`TokenVault::encrypt`]
//! draws a fresh random nonce.

use crate::error::{ConnectionError, ConnectionResult};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use std::fmt;

const ENVELOPE_VERSION: &str = "v1";
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct TokenVault {
    cipher: Aes256Gcm,
}

impl TokenVault {
    /// Derive the AES-256 key from a server-managed secret.
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"repurpose:token-vault:v1:");
        hasher.update(secret.as_bytes());
        let key = hasher.finalize();

        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> ConnectionResult<String> {
        self.encrypt_bytes(plaintext.as_bytes())
    }

    pub fn decrypt(&self, envelope: &str) -> ConnectionResult<String> {
        let bytes = self.decrypt_bytes(envelope)?;
        String::from_utf8(bytes)
            .map_err(|_| ConnectionError::Decryption("plaintext is not valid UTF-8".to_string()))
    }

    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> ConnectionResult<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ConnectionError::Internal("token encryption failed".to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}:{}",
            ENVELOPE_VERSION,
            URL_SAFE_NO_PAD.encode(&combined)
        ))
    }

    pub fn decrypt_bytes(&self, envelope: &str) -> ConnectionResult<Vec<u8>> {
        let (version, payload) = envelope
            .split_once(':')
            .ok_or_else(|| ConnectionError::Decryption("malformed envelope".to_string()))?;

        if version != ENVELOPE_VERSION {
            return Err(ConnectionError::Decryption(format!(
                "unsupported envelope version '{}'",
                version
            )));
        }

        let combined = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| ConnectionError::Decryption("envelope is not valid base64".to_string()))?;

        if combined.len() <= NONCE_LEN {
            return Err(ConnectionError::Decryption("envelope too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                ConnectionError::Decryption("authentication failed (wrong key or corrupted data)".to_string())
            })
    }
}

impl fmt::Debug for TokenVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVault").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "vault-secret-for-tests-0123456789abcdef";

    #[test]
    fn round_trips_realistic_tokens() {
        let vault = TokenVault::new(SECRET);
        let tokens = [
            "",
            "tok1",
            "EAAGm0PX4ZCpsBAKZAtZCv3ZBZC3qJ6ZBZA7fbh2dQmpX9ZCZCy5ZBlZB5rAZDZD",
            "ya29.a0AfH6SMBx-very-long-google-access-token-with.dots_and-dashes",
            &"x".repeat(2048),
        ];

        for token in tokens {
            let envelope = vault.encrypt(token).unwrap();
            assert!(envelope.starts_with("v1:"));
            assert_eq!(vault.decrypt(&envelope).unwrap(), token);
        }
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let vault = TokenVault::new(SECRET);
        let bytes: Vec<u8> = (0..=255u8).collect();
        let envelope = vault.encrypt_bytes(&bytes).unwrap();
        assert_eq!(vault.decrypt_bytes(&envelope).unwrap(), bytes);
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let vault = TokenVault::new(SECRET);
        let a = vault.encrypt("identical").unwrap();
        let b = vault.encrypt("identical").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_is_a_decryption_error() {
        let envelope = TokenVault::new(SECRET).encrypt("tok1").unwrap();
        let err = TokenVault::new("another-secret-another-secret-xx")
            .decrypt(&envelope)
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Decryption(_)));
    }

    #[test]
    fn rejects_tampered_and_malformed_envelopes() {
        let vault = TokenVault::new(SECRET);
        let envelope = vault.encrypt("tok1").unwrap();

        let mut tampered = envelope.clone();
        tampered.push('A');
        assert!(matches!(
            vault.decrypt(&tampered),
            Err(ConnectionError::Decryption(_))
        ));

        let other_version = envelope.replacen("v1:", "v2:", 1);
        assert!(matches!(
            vault.decrypt(&other_version),
            Err(ConnectionError::Decryption(_))
        ));

        for bad in ["", "v1", "v1:", "v1:!!!", "plaintext-token"] {
            assert!(matches!(
                vault.decrypt(bad),
                Err(ConnectionError::Decryption(_))
            ));
        }
    }

    #[test]
    fn debug_does_not_expose_key_material() {
        let rendered = format!("{:?}", TokenVault::new(SECRET));
        assert_eq!(rendered, "TokenVault { .. }");
    }
}
