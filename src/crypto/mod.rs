//! End-to-end key exchange and record-layer encryption.
//!
//! Each endpoint holds a long-term X25519 keypair, persisted on disk the
//! same way the teacher's device identity persists an Ed25519 identity,
//! but generating Diffie-Hellman agreement keys instead of signing keys,
//! since pairing needs key exchange, not signatures. The relay never sees
//! either private key: it only relays base64-encoded public keys during
//! `pair/complete` (see `pairing`).

mod cipher;
mod identity;

pub use cipher::Cipher;
pub use identity::{Identity, KeyStore};

use hkdf::Hkdf;
use sha2::Sha256;

use crate::{Error, Result};

/// HKDF context string binding the derived key to this protocol.
const HKDF_CONTEXT: &[u8] = b"claude-watch-e2e";

/// Derive the 32-byte symmetric session key from an X25519 shared secret.
///
/// Uses an empty salt and the fixed context string `"claude-watch-e2e"`,
/// exactly as specified for the pairing key-exchange step.
pub fn derive_session_key(shared_secret: &[u8; 32]) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(HKDF_CONTEXT, &mut okm)
        .map_err(|e| Error::Crypto(format!("hkdf expand failed: {e}")))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let secret = [7u8; 32];
        let a = derive_session_key(&secret).unwrap();
        let b = derive_session_key(&secret).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_secrets_derive_different_keys() {
        let a = derive_session_key(&[1u8; 32]).unwrap();
        let b = derive_session_key(&[2u8; 32]).unwrap();
        assert_ne!(a, b);
    }
}
