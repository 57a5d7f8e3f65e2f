//! Long-term X25519 identity, persisted on disk.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{Error, Result};

/// An endpoint's long-term X25519 keypair, base64-encoded for storage and
/// transport.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    /// X25519 public key, base64 (standard alphabet).
    pub public_key: String,

    /// X25519 private key, base64. Never sent to the relay, never printed:
    /// wrapped so an accidental `{:?}` of an `Identity` can't leak it.
    #[serde(skip_serializing_if = "Option::is_none", with = "secret_key_codec")]
    secret_key: Option<SecretString>,

    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[redacted]"))
            .field("created_at", &self.created_at)
            .finish()
    }
}

mod secret_key_codec {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<SecretString>, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(secret) => serializer.serialize_some(secret.expose_secret()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.map(SecretString::from))
    }
}

impl Identity {
    /// Generate a fresh keypair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        Self {
            public_key: encode(public.as_bytes()),
            secret_key: Some(SecretString::from(encode(&secret.to_bytes()))),
            created_at: Utc::now(),
        }
    }

    /// Compute the X25519 shared secret with `peer_public_key` (base64).
    ///
    /// # Errors
    ///
    /// Returns `Error::Crypto` if this identity has no private key or the
    /// peer key is malformed.
    pub fn agree(&self, peer_public_key: &str) -> Result<[u8; 32]> {
        let secret_bytes = self
            .secret_key
            .as_ref()
            .ok_or_else(|| Error::Crypto("identity has no private key".into()))?
            .expose_secret();
        let secret = StaticSecret::from(fixed_32(&decode(secret_bytes)?)?);

        let peer_bytes = fixed_32(&decode(peer_public_key)?)?;
        let peer = PublicKey::from(peer_bytes);

        Ok(secret.diffie_hellman(&peer).to_bytes())
    }

    /// A public-only copy, safe to log or transmit.
    #[must_use]
    pub fn public_only(&self) -> Self {
        Self {
            public_key: self.public_key.clone(),
            secret_key: None,
            created_at: self.created_at,
        }
    }
}

fn fixed_32(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| Error::Crypto("expected a 32-byte key".into()))
}

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn decode(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| Error::Crypto(format!("invalid base64 key: {e}")))
}

/// Load-or-create persistence for an `Identity`, mirroring the teacher's
/// device-identity on-disk load-or-generate flow.
pub struct KeyStore;

impl KeyStore {
    /// Load the identity at `path`, or generate and persist a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not valid JSON, or if
    /// the file cannot be written.
    pub fn load_or_create(path: &Path) -> Result<Identity> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let identity: Identity = serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("invalid key store at {}: {e}", path.display())))?;
            tracing::debug!(path = %path.display(), "loaded crypto identity");
            Ok(identity)
        } else {
            let identity = Identity::generate();

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let content = serde_json::to_string_pretty(&identity)
                .map_err(|e| Error::Config(format!("failed to serialize identity: {e}")))?;
            fs::write(path, content)?;

            tracing::info!(path = %path.display(), "generated new crypto identity");
            Ok(identity)
        }
    }

    /// Default identity path: `<data dir>/claude-watch/crypto/identity.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        directories::BaseDirs::new().map_or_else(
            || PathBuf::from(".local/share/claude-watch/crypto/identity.json"),
            |d| {
                d.data_dir()
                    .join("claude-watch")
                    .join("crypto")
                    .join("identity.json")
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_identities_agree_on_the_same_secret() {
        let a = Identity::generate();
        let b = Identity::generate();

        let secret_a = a.agree(&b.public_key).unwrap();
        let secret_b = b.agree(&a.public_key).unwrap();
        assert_eq!(secret_a, secret_b);
    }

    #[test]
    fn public_only_strips_the_private_key() {
        let a = Identity::generate();
        let public = a.public_only();
        assert!(public.secret_key.is_none());
        assert_eq!(public.public_key, a.public_key);
    }

    #[test]
    fn debug_format_never_prints_the_private_key() {
        let a = Identity::generate();
        let rendered = format!("{a:?}");
        assert!(rendered.contains("[redacted]"));
        assert!(!a.secret_key.as_ref().unwrap().expose_secret().is_empty());
        assert!(!rendered.contains(a.secret_key.as_ref().unwrap().expose_secret()));
    }

    #[test]
    fn load_or_create_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let first = KeyStore::load_or_create(&path).unwrap();
        let second = KeyStore::load_or_create(&path).unwrap();
        assert_eq!(first.public_key, second.public_key);
    }
}
