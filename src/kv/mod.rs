//! Key-value fabric abstraction over an edge store.
//!
//! The relay's only persistent-ish state lives here: pairing sessions,
//! connections, queues, progress snapshots, and session control all read and
//! write through a [`KvStore`]. The trait is deliberately the smallest
//! surface a real edge KV (Cloudflare KV, `DynamoDB`, etcd) would need to
//! support: `get`, `put` with an optional TTL, `delete`, and an atomic
//! compare-and-swap for read-modify-write updates (spec.md §5: "All writes to
//! queue/snapshot keys MUST be atomic read-modify-write").
//!
//! [`MemoryKv`] is the only backend shipped. A single eventually-consistent
//! edge store is explicitly sufficient (spec.md Non-goals), and for a single
//! relay process a concurrent in-memory map *is* that store; a distributed
//! backend is a drop-in implementation of the same trait.

pub mod keys;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::Result;

/// An entry in the KV fabric: raw bytes plus an optional expiry instant.
#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// A small abstraction over an edge key-value store.
///
/// Implementations MUST make `compare_and_swap` atomic with respect to
/// concurrent callers on the same key; callers use it to implement
/// read-modify-write without a server-side transaction.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the raw bytes stored at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` at `key`, optionally expiring it after `ttl`.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove `key` unconditionally.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically replace the value at `key` with `new` iff the current
    /// value equals `expected` (`None` meaning "key absent or expired").
    ///
    /// Returns `true` if the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
        ttl: Option<Duration>,
    ) -> Result<bool>;
}

/// In-memory `KvStore` backed by a sharded concurrent map.
///
/// Expired entries are lazily dropped on access and periodically swept by
/// [`MemoryKv::spawn_sweeper`] so long-idle keys don't linger.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<DashMap<String, Entry>>,
}

impl MemoryKv {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a background task that periodically evicts expired entries.
    ///
    /// Returns a handle the caller should keep or abort on shutdown.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                inner.retain(|_, entry| !entry.is_expired());
            }
        })
    }

    #[must_use]
    fn read_live(&self, key: &str) -> Option<Vec<u8>> {
        let live = self.inner.get(key).and_then(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(entry.value.clone())
            }
        });
        if live.is_none() {
            self.inner.remove(key);
        }
        live
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read_live(key))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.inner.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        use dashmap::mapref::entry::Entry as DashEntry;

        let current = self.read_live(key);
        if current.as_deref() != expected {
            return Ok(false);
        }

        match new {
            Some(value) => {
                let expires_at = ttl.map(|d| Instant::now() + d);
                self.inner
                    .insert(key.to_string(), Entry { value, expires_at });
            }
            None => match self.inner.entry(key.to_string()) {
                DashEntry::Occupied(occ) => {
                    occ.remove();
                }
                DashEntry::Vacant(_) => {}
            },
        }
        Ok(true)
    }
}

/// Retry a compare-and-swap read-modify-write loop up to `attempts` times,
/// returning `Error::Conflict` if every attempt loses the race.
///
/// `f` receives the current decoded value (or `None` if absent/expired) and
/// returns the new raw bytes to attempt to write, or `None` to delete.
pub async fn retry_cas<F>(
    store: &dyn KvStore,
    key: &str,
    ttl: Option<Duration>,
    attempts: u32,
    mut f: F,
) -> Result<()>
where
    F: FnMut(Option<&[u8]>) -> Result<Option<Vec<u8>>>,
{
    for _ in 0..attempts {
        let current = store.get(key).await?;
        let new = f(current.as_deref())?;
        if store
            .compare_and_swap(key, current.as_deref(), new, ttl)
            .await?
        {
            return Ok(());
        }
    }
    Err(crate::Error::Conflict(format!(
        "compare-and-swap retries exhausted for key {key}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_put_delete_roundtrip() {
        let kv = MemoryKv::new();
        assert!(kv.get("a").await.unwrap().is_none());

        kv.put("a", b"hello".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().unwrap(), b"hello");

        kv.delete("a").await.unwrap();
        assert!(kv.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let kv = MemoryKv::new();
        kv.put("a", b"hello".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(kv.get("a").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(kv.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cas_only_succeeds_on_matching_expected() {
        let kv = MemoryKv::new();
        kv.put("a", b"one".to_vec(), None).await.unwrap();

        let ok = kv
            .compare_and_swap("a", Some(b"wrong"), Some(b"two".to_vec()), None)
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(kv.get("a").await.unwrap().unwrap(), b"one");

        let ok = kv
            .compare_and_swap("a", Some(b"one"), Some(b"two".to_vec()), None)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(kv.get("a").await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn retry_cas_retries_on_concurrent_writer() {
        let kv = MemoryKv::new();
        kv.put("counter", b"0".to_vec(), None).await.unwrap();

        retry_cas(&kv, "counter", None, 3, |current| {
            let n: i32 = current
                .map(|b| std::str::from_utf8(b).unwrap().parse().unwrap())
                .unwrap_or(0);
            Ok(Some((n + 1).to_string().into_bytes()))
        })
        .await
        .unwrap();

        assert_eq!(kv.get("counter").await.unwrap().unwrap(), b"1");
    }
}
