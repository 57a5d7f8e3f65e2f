//! Progress snapshot: last-write-wins progress record keyed by `pairingId`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kv::{keys, retry_cas, KvStore};
use crate::Result;

/// TTL for a progress snapshot.
const PROGRESS_TTL_SECS: u64 = 5 * 60;

/// One task entry inside a `ProgressSnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    pub name: String,
    pub done: bool,
}

/// Last-write-wins progress record for a pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "current_task")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "current_activity")]
    pub current_activity: Option<String>,
    pub progress: f64,
    #[serde(alias = "completed_count")]
    pub completed_count: u32,
    #[serde(alias = "total_count")]
    pub total_count: u32,
    #[serde(alias = "elapsed_seconds")]
    pub elapsed_seconds: u64,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// `isComplete ⇔ progress>=1 ∨ (total>0 ∧ completed==total)`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0 || (self.total_count > 0 && self.completed_count == self.total_count)
    }
}

/// Repository over a single pairing's progress snapshot.
#[derive(Clone)]
pub struct ProgressStore<S> {
    store: S,
}

impl<S> ProgressStore<S>
where
    S: KvStore + 'static,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Overwrite the snapshot, unless `snapshot.updated_at` is older than
    /// the stored one (monotonicity).
    pub async fn apply(&self, pairing_id: &str, snapshot: ProgressSnapshot) -> Result<()> {
        let key = keys::progress(pairing_id);
        let ttl = std::time::Duration::from_secs(PROGRESS_TTL_SECS);

        retry_cas(&self.store, &key, Some(ttl), 3, |current| {
            if let Some(bytes) = current {
                let existing: ProgressSnapshot = serde_json::from_slice(bytes)?;
                if snapshot.updated_at < existing.updated_at {
                    return Ok(Some(bytes.to_vec()));
                }
            }
            Ok(Some(serde_json::to_vec(&snapshot)?))
        })
        .await
    }

    /// `None` if absent or aged past TTL.
    pub async fn fetch(&self, pairing_id: &str) -> Result<Option<ProgressSnapshot>> {
        let key = keys::progress(pairing_id);
        match self.store.get(&key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use chrono::Duration;

    fn store() -> ProgressStore<MemoryKv> {
        ProgressStore::new(MemoryKv::new())
    }

    fn snapshot(progress: f64, updated_at: DateTime<Utc>) -> ProgressSnapshot {
        ProgressSnapshot {
            current_task: None,
            current_activity: None,
            progress,
            completed_count: 0,
            total_count: 0,
            elapsed_seconds: 0,
            tasks: Vec::new(),
            outcome: None,
            updated_at,
        }
    }

    #[tokio::test]
    async fn later_updated_at_wins() {
        let s = store();
        let t0 = Utc::now();
        s.apply("p1", snapshot(0.1, t0)).await.unwrap();
        s.apply("p1", snapshot(0.5, t0 + Duration::seconds(5))).await.unwrap();

        let fetched = s.fetch("p1").await.unwrap().unwrap();
        assert!((fetched.progress - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stale_update_never_becomes_visible() {
        let s = store();
        let t0 = Utc::now();
        s.apply("p1", snapshot(0.5, t0)).await.unwrap();
        s.apply("p1", snapshot(0.1, t0 - Duration::seconds(5))).await.unwrap();

        let fetched = s.fetch("p1").await.unwrap().unwrap();
        assert!((fetched.progress - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn is_complete_by_progress_or_counts() {
        let mut snap = snapshot(1.0, Utc::now());
        assert!(snap.is_complete());

        snap.progress = 0.2;
        snap.total_count = 4;
        snap.completed_count = 4;
        assert!(snap.is_complete());

        snap.completed_count = 3;
        assert!(!snap.is_complete());
    }

    #[tokio::test]
    async fn fetch_missing_is_none() {
        let s = store();
        assert!(s.fetch("nope").await.unwrap().is_none());
    }
}
