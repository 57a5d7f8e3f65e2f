//! Approval queue: bridge-originated tool-use requests answered from the
//! wrist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kv::{keys, retry_cas, KvStore};
use crate::queues::{QUEUE_CAPACITY, QUEUE_TTL_SECS};
use crate::{Error, Result};

/// Status of an approval request. Monotonic: `Pending -> {Approved,Rejected}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A single tool-use approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "file_path")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    pub status: ApprovalStatus,
}

/// Repository over a single pairing's approval queue.
#[derive(Clone)]
pub struct ApprovalQueue<S> {
    store: S,
}

impl<S> ApprovalQueue<S>
where
    S: KvStore + 'static,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Append a request. Idempotent on `id`: a repeat `enqueue` for the
    /// same `(pairingId, id)` is a no-op.
    pub async fn enqueue(
        &self,
        pairing_id: &str,
        id: &str,
        kind: &str,
        title: &str,
        description: Option<String>,
        file_path: Option<String>,
        command: Option<String>,
    ) -> Result<()> {
        let key = keys::approval_queue(pairing_id);
        let ttl = std::time::Duration::from_secs(QUEUE_TTL_SECS);

        retry_cas(&self.store, &key, Some(ttl), 3, |current| {
            let mut queue = decode(current)?;

            if queue.iter().any(|r| r.id == id) {
                return Ok(Some(serde_json::to_vec(&queue)?));
            }

            queue.push(ApprovalRequest {
                id: id.to_string(),
                kind: kind.to_string(),
                title: title.to_string(),
                description: description.clone(),
                file_path: file_path.clone(),
                command: command.clone(),
                created_at: Utc::now(),
                status: ApprovalStatus::Pending,
            });
            prune(&mut queue);
            Ok(Some(serde_json::to_vec(&queue)?))
        })
        .await
    }

    /// Pending requests only, ordered `createdAt` ascending, `id`
    /// lexicographic on ties. Never clears the queue.
    pub async fn fetch_pending(&self, pairing_id: &str) -> Result<Vec<ApprovalRequest>> {
        let key = keys::approval_queue(pairing_id);
        let queue = decode(self.store.get(&key).await?.as_deref())?;
        let mut pending: Vec<_> = queue
            .into_iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }

    /// Flip `id`'s status exactly once. A second call is a no-op.
    pub async fn respond(&self, pairing_id: &str, id: &str, approved: bool) -> Result<()> {
        let key = keys::approval_queue(pairing_id);
        let ttl = std::time::Duration::from_secs(QUEUE_TTL_SECS);

        retry_cas(&self.store, &key, Some(ttl), 3, |current| {
            let mut queue = decode(current)?;
            if let Some(entry) = queue.iter_mut().find(|r| r.id == id) {
                if entry.status == ApprovalStatus::Pending {
                    entry.status = if approved {
                        ApprovalStatus::Approved
                    } else {
                        ApprovalStatus::Rejected
                    };
                }
            }
            Ok(Some(serde_json::to_vec(&queue)?))
        })
        .await
    }

    /// What the bridge polls for a given request's resolution.
    pub async fn fetch_response(&self, pairing_id: &str, id: &str) -> Result<ApprovalStatus> {
        let key = keys::approval_queue(pairing_id);
        let queue = decode(self.store.get(&key).await?.as_deref())?;
        queue
            .into_iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
            .ok_or_else(|| Error::NotFound(format!("approval request {id} not found")))
    }

    /// Single request by id, for the `/approval/{pairingId}/{requestId}`
    /// read path.
    pub async fn get(&self, pairing_id: &str, id: &str) -> Result<ApprovalRequest> {
        let key = keys::approval_queue(pairing_id);
        let queue = decode(self.store.get(&key).await?.as_deref())?;
        queue
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(format!("approval request {id} not found")))
    }

    /// Remove the entire queue (session-end).
    pub async fn drain(&self, pairing_id: &str) -> Result<()> {
        self.store.delete(&keys::approval_queue(pairing_id)).await
    }
}

fn decode(bytes: Option<&[u8]>) -> Result<Vec<ApprovalRequest>> {
    match bytes {
        Some(b) => Ok(serde_json::from_slice(b)?),
        None => Ok(Vec::new()),
    }
}

fn prune(queue: &mut Vec<ApprovalRequest>) {
    if queue.len() > QUEUE_CAPACITY {
        queue.sort_by_key(|r| r.created_at);
        let overflow = queue.len() - QUEUE_CAPACITY;
        queue.drain(0..overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn queue() -> ApprovalQueue<MemoryKv> {
        ApprovalQueue::new(MemoryKv::new())
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_on_id() {
        let q = queue();
        q.enqueue("p1", "r1", "bash", "npm install", None, None, Some("npm install".into()))
            .await
            .unwrap();
        q.enqueue("p1", "r1", "bash", "npm install", None, None, Some("npm install".into()))
            .await
            .unwrap();

        let pending = q.fetch_pending("p1").await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn respond_is_exactly_once() {
        let q = queue();
        q.enqueue("p1", "r1", "bash", "npm install", None, None, None)
            .await
            .unwrap();

        q.respond("p1", "r1", true).await.unwrap();
        q.respond("p1", "r1", false).await.unwrap();

        assert_eq!(q.fetch_response("p1", "r1").await.unwrap(), ApprovalStatus::Approved);
        assert!(q.fetch_pending("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_response_unknown_is_not_found() {
        let q = queue();
        let err = q.fetch_response("p1", "nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn tie_break_orders_by_created_at_then_id() {
        let q = queue();
        q.enqueue("p1", "b", "bash", "b", None, None, None).await.unwrap();
        q.enqueue("p1", "a", "bash", "a", None, None, None).await.unwrap();

        let pending = q.fetch_pending("p1").await.unwrap();
        assert_eq!(pending[0].id, "b");
        assert_eq!(pending[1].id, "a");
    }

    #[tokio::test]
    async fn drain_removes_entire_queue() {
        let q = queue();
        q.enqueue("p1", "r1", "bash", "t", None, None, None).await.unwrap();
        q.drain("p1").await.unwrap();
        assert!(q.fetch_pending("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn capacity_prunes_oldest() {
        let q = queue();
        for i in 0..60 {
            q.enqueue("p1", &format!("r{i:03}"), "bash", "t", None, None, None)
                .await
                .unwrap();
        }
        let pending = q.fetch_pending("p1").await.unwrap();
        assert_eq!(pending.len(), QUEUE_CAPACITY);
        assert_eq!(pending[0].id, "r010");
    }
}
