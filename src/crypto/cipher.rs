//! Record-layer AEAD: XChaCha20-Poly1305, `nonce || ciphertext || tag`
//! framed and base64-encoded.

use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, XChaCha20Poly1305, XNonce};

use crate::{Error, Result};

/// 24-byte extended nonce used by `XChaCha20Poly1305`.
const NONCE_LEN: usize = 24;

/// A symmetric record-layer cipher bound to one derived session key.
pub struct Cipher {
    aead: XChaCha20Poly1305,
}

impl Cipher {
    /// Build a cipher from a 32-byte session key (see
    /// `crypto::derive_session_key`).
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Seal `plaintext`, returning a base64 frame of
    /// `nonce || ciphertext || tag`. Each call samples a fresh random
    /// nonce; nonces are never reused.
    ///
    /// # Errors
    ///
    /// Returns `Error::Crypto` if the underlying AEAD seal fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .aead
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("encrypt failed: {e}")))?;

        let mut frame = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(frame))
    }

    /// Open a base64 frame produced by `encrypt`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Crypto` if the frame is malformed, too short, or
    /// fails authentication (including any single-byte tamper).
    pub fn decrypt(&self, frame: &str) -> Result<Vec<u8>> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(frame)
            .map_err(|e| Error::Crypto(format!("invalid base64 frame: {e}")))?;

        if raw.len() < NONCE_LEN {
            return Err(Error::Crypto("frame shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);

        self.aead
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Crypto(format!("decrypt failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_encryption() {
        let cipher = Cipher::new(&[3u8; 32]);
        let plaintext = b"permission request payload";

        let frame = cipher.encrypt(plaintext).unwrap();
        let decrypted = cipher.decrypt(&frame).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let cipher = Cipher::new(&[5u8; 32]);
        let frame = cipher.encrypt(b"hello").unwrap();

        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(&frame)
            .unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);

        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn two_encryptions_use_different_nonces() {
        let cipher = Cipher::new(&[9u8; 32]);
        let a = cipher.encrypt(b"same plaintext").unwrap();
        let b = cipher.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }
}
