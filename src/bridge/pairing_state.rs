//! Persisted per-user bridge pairing state.
//!
//! Written after a successful `bridge run` invocation so a later invocation
//! can omit `--pairing-id`/`CLAUDE_WATCH_PAIRING_ID`, mirroring the
//! load-or-create shape `crypto::KeyStore` uses for the identity file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// `{ pairingId, cloudUrl, createdAt, wrapper? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingState {
    pub pairing_id: String,
    pub cloud_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper: Option<String>,
}

impl PairingState {
    #[must_use]
    pub fn new(pairing_id: String, cloud_url: String, wrapper: Option<String>) -> Self {
        Self {
            pairing_id,
            cloud_url,
            created_at: Utc::now(),
            wrapper,
        }
    }

    /// Load the persisted state at `path`, or `None` if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not valid JSON.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)?;
        let state = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid pairing state at {}: {e}", path.display())))?;
        Ok(Some(state))
    }

    /// Persist this state to `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize pairing state: {e}")))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// `<config dir>/claude-watch/pairing.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        directories::BaseDirs::new().map_or_else(
            || PathBuf::from(".config/claude-watch/pairing.json"),
            |d| d.config_dir().join("claude-watch").join("pairing.json"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairing.json");

        let state = PairingState::new("p1".into(), "https://relay.example".into(), Some("claude".into()));
        state.save(&path).unwrap();

        let loaded = PairingState::load(&path).unwrap().unwrap();
        assert_eq!(loaded.pairing_id, "p1");
        assert_eq!(loaded.cloud_url, "https://relay.example");
        assert_eq!(loaded.wrapper.as_deref(), Some("claude"));
    }

    #[test]
    fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(PairingState::load(&path).unwrap().is_none());
    }

    #[test]
    fn serializes_camel_case_fields() {
        let state = PairingState::new("p1".into(), "https://relay.example".into(), None);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"pairingId\""));
        assert!(json.contains("\"cloudUrl\""));
        assert!(!json.contains("wrapper"));
    }
}
