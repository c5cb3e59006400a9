//! In-process cache backend

use super::RenderCache;
use crate::{CacheKey, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    bytes: Bytes,
    expires_at: Instant,
}

/// Cache stored in a mutex-guarded map. Expired entries are dropped lazily
/// on read or in bulk by [`RenderCache::purge_expired`].
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<CacheKey, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Cache("memory cache lock poisoned".into()))
    }
}

#[async_trait]
impl RenderCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Ok(Some(e.bytes.clone())),
            Some(_) => {
                debug!("memory cache entry {} expired", key);
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, bytes: Bytes, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.lock()?.insert(key.clone(), Entry { bytes, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = MemoryCache::new();
        let key = fingerprint("k");
        cache
            .put(&key, Bytes::from_static(b"\xff\xd8jpeg"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap().unwrap(), &b"\xff\xd8jpeg"[..]);
    }

    #[tokio::test]
    async fn miss_is_none() {
        let cache = MemoryCache::new();
        assert!(cache.get(&fingerprint("absent")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = MemoryCache::new();
        let key = fingerprint("k");
        cache
            .put(&key, Bytes::from_static(b"v"), Duration::from_secs(24 * 3600))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(24 * 3600 - 1)).await;
        assert!(cache.get(&key).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn overwrite_and_delete() {
        let cache = MemoryCache::new();
        let key = fingerprint("k");
        let ttl = Duration::from_secs(60);
        cache.put(&key, Bytes::from_static(b"one"), ttl).await.unwrap();
        cache.put(&key, Bytes::from_static(b"two"), ttl).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().unwrap(), &b"two"[..]);
        assert_eq!(cache.len(), 1);

        assert!(cache.delete(&key).await.unwrap());
        assert!(!cache.delete(&key).await.unwrap());
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let cache = MemoryCache::new();
        cache
            .put(&fingerprint("short"), Bytes::from_static(b"a"), Duration::from_secs(1))
            .await
            .unwrap();
        cache
            .put(&fingerprint("long"), Bytes::from_static(b"b"), Duration::from_secs(100))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
    }
}
