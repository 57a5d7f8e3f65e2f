//! Pairing registry: short-lived code → session mappings and long-lived
//! `pairingId` → connection records.
//!
//! Pairing uses the wrist-displays, CLI-types direction: the code is
//! generated on the watch side and typed into the CLI, never the reverse.
//! Grounded on the teacher's DM-pairing manager operation shape
//! (`is_allowed`/`generate_pairing_code`/`verify_pairing`), rebuilt over
//! `kv::KvStore` with a uniform 6-digit numeric code instead of an
//! alphanumeric one.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kv::{keys, retry_cas, KvStore};
use crate::{Error, Result};

/// Pairing codes are uniform 6-digit decimal strings, e.g. `"007421"`.
const CODE_DIGITS: u32 = 6;

/// PairingSession TTL before the watch completes pairing.
const PENDING_TTL_SECS: u64 = 300;

/// PairingSession TTL after pairing completes, so the watch's next status
/// poll succeeds but the code can't be reused.
const PAIRED_TTL_SECS: u64 = 60;

/// Connection record TTL, refreshed on every use.
const CONNECTION_TTL_SECS: u64 = 24 * 60 * 60;

/// How many times `initiate` retries on a code collision before giving up.
const CODE_COLLISION_RETRIES: u32 = 5;

/// CAS retry bound shared by every read-modify-write in this module.
const CAS_RETRIES: u32 = 3;

/// A pending or completed pairing handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingSession {
    pub code: String,
    pub watch_id: String,
    pub device_token: String,
    pub watch_public_key: String,
    pub cli_public_key: Option<String>,
    pub paired: bool,
    pub pairing_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A long-lived record of a completed pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub pairing_id: String,
    pub device_token: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Result of `status(watchId)`.
#[derive(Debug, Clone)]
pub struct PairingStatus {
    pub paired: bool,
    pub pairing_id: Option<String>,
    pub cli_public_key: Option<String>,
}

/// Result of `complete(code, ...)`.
#[derive(Debug, Clone)]
pub struct CompleteOutcome {
    pub pairing_id: String,
    pub watch_public_key: String,
}

/// Pairing registry backed by a `KvStore`.
#[derive(Clone)]
pub struct PairingRegistry<S> {
    store: S,
}

impl<S> PairingRegistry<S>
where
    S: KvStore + Clone + 'static,
{
    /// Build a registry over the given store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Generate a code, create a `PairingSession`, and store it under both
    /// `watch_code:{code}` and `watch:{watchId}`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Exhausted` if every retry collides with a live code.
    pub async fn initiate(
        &self,
        device_token: &str,
        watch_public_key: &str,
    ) -> Result<(String, String)> {
        let watch_id = Uuid::new_v4().to_string();
        let ttl = std::time::Duration::from_secs(PENDING_TTL_SECS);

        for _ in 0..CODE_COLLISION_RETRIES {
            let code = generate_code();
            let code_key = keys::watch_code(&code);

            if self.store.get(&code_key).await?.is_some() {
                continue;
            }

            let session = PairingSession {
                code: code.clone(),
                watch_id: watch_id.clone(),
                device_token: device_token.to_string(),
                watch_public_key: watch_public_key.to_string(),
                cli_public_key: None,
                paired: false,
                pairing_id: None,
                created_at: Utc::now(),
            };
            let encoded = serde_json::to_vec(&session)?;

            let claimed = self
                .store
                .compare_and_swap(&code_key, None, Some(encoded.clone()), Some(ttl))
                .await?;
            if !claimed {
                continue;
            }

            self.store
                .put(&keys::watch(&watch_id), encoded, Some(ttl))
                .await?;

            return Ok((code, watch_id));
        }

        Err(Error::Exhausted(
            "no unique pairing code after retries".into(),
        ))
    }

    /// Fetch the current pairing status for a watch.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the session has expired.
    pub async fn status(&self, watch_id: &str) -> Result<PairingStatus> {
        let session = self.load_by_watch_id(watch_id).await?;
        Ok(PairingStatus {
            paired: session.paired,
            pairing_id: session.pairing_id,
            cli_public_key: session.cli_public_key,
        })
    }

    /// Complete a pairing by code. Idempotent: a second call with the same
    /// code while the session is still alive returns the existing
    /// `pairingId` rather than minting a new one.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the code is unknown or expired.
    pub async fn complete(
        &self,
        code: &str,
        device_token: &str,
        cli_public_key: &str,
    ) -> Result<CompleteOutcome> {
        let code_key = keys::watch_code(code);
        let paired_ttl = std::time::Duration::from_secs(PAIRED_TTL_SECS);

        let mut outcome: Option<CompleteOutcome> = None;
        retry_cas(&self.store, &code_key, Some(paired_ttl), CAS_RETRIES, |current| {
            let Some(bytes) = current else {
                return Err(Error::NotFound(format!("pairing code {code} not found")));
            };
            let mut session: PairingSession = serde_json::from_slice(bytes)?;

            let pairing_id = session
                .pairing_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            session.paired = true;
            session.pairing_id = Some(pairing_id.clone());
            session.cli_public_key = Some(cli_public_key.to_string());

            outcome = Some(CompleteOutcome {
                pairing_id,
                watch_public_key: session.watch_public_key.clone(),
            });

            Ok(Some(serde_json::to_vec(&session)?))
        })
        .await?;

        let outcome = outcome.expect("set on every successful retry_cas branch");

        let watch_key = keys::watch(&self.watch_id_for(code).await?);
        if let Some(bytes) = self.store.get(&code_key).await? {
            self.store
                .put(&watch_key, bytes, Some(paired_ttl))
                .await?;
        }

        let now = Utc::now();
        let connection = Connection {
            pairing_id: outcome.pairing_id.clone(),
            device_token: device_token.to_string(),
            created_at: now,
            last_seen: now,
        };
        self.store
            .put(
                &keys::connection(&outcome.pairing_id),
                serde_json::to_vec(&connection)?,
                Some(std::time::Duration::from_secs(CONNECTION_TTL_SECS)),
            )
            .await?;

        Ok(outcome)
    }

    /// Legacy "CLI shows code, watch enters code" pairing direction.
    ///
    /// Never called by `api::pairing`; retained only so the signature stays
    /// documented for operators migrating off the deprecated flow.
    #[deprecated(note = "the CLI-initiated pairing direction is removed; use initiate")]
    pub fn initiate_legacy_cli_side(&self, _cli_public_key: &str) -> Result<(String, String)> {
        Err(Error::InvalidInput(
            "the CLI-initiated pairing direction is no longer supported".into(),
        ))
    }

    async fn load_by_watch_id(&self, watch_id: &str) -> Result<PairingSession> {
        let bytes = self
            .store
            .get(&keys::watch(watch_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("watch {watch_id} not found")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn watch_id_for(&self, code: &str) -> Result<String> {
        let bytes = self
            .store
            .get(&keys::watch_code(code))
            .await?
            .ok_or_else(|| Error::NotFound(format!("pairing code {code} not found")))?;
        let session: PairingSession = serde_json::from_slice(&bytes)?;
        Ok(session.watch_id)
    }
}

/// Generate a uniform 6-digit decimal code, leading zeros allowed.
fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..10u32.pow(CODE_DIGITS));
    format!("{n:0width$}", width = CODE_DIGITS as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn registry() -> PairingRegistry<MemoryKv> {
        PairingRegistry::new(MemoryKv::new())
    }

    #[tokio::test]
    async fn initiate_then_status_then_complete() {
        let reg = registry();
        let (code, watch_id) = reg.initiate("tok-A", "W-pub").await.unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        let status = reg.status(&watch_id).await.unwrap();
        assert!(!status.paired);

        let outcome = reg.complete(&code, "tok-A", "C-pub").await.unwrap();
        assert_eq!(outcome.watch_public_key, "W-pub");

        let status = reg.status(&watch_id).await.unwrap();
        assert!(status.paired);
        assert_eq!(status.pairing_id, Some(outcome.pairing_id));
        assert_eq!(status.cli_public_key.as_deref(), Some("C-pub"));
    }

    #[tokio::test]
    async fn complete_is_idempotent_by_code() {
        let reg = registry();
        let (code, _) = reg.initiate("tok-A", "W-pub").await.unwrap();

        let first = reg.complete(&code, "tok-A", "C-pub").await.unwrap();
        let second = reg.complete(&code, "tok-A", "C-pub").await.unwrap();
        assert_eq!(first.pairing_id, second.pairing_id);
    }

    #[tokio::test]
    async fn complete_unknown_code_is_not_found() {
        let reg = registry();
        let err = reg.complete("000000", "tok", "C-pub").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn status_unknown_watch_is_not_found() {
        let reg = registry();
        let err = reg.status("nonexistent").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn two_concurrent_initiates_never_collide() {
        let reg = registry();
        let (code_a, _) = reg.initiate("tok-A", "A-pub").await.unwrap();
        let (code_b, _) = reg.initiate("tok-B", "B-pub").await.unwrap();
        assert_ne!(code_a, code_b);
    }
}
