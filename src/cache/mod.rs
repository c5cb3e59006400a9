//! Render cache: binary payloads keyed by [`CacheKey`] with time-based expiry
//!
//! Backends implement [`RenderCache`]. A read of an absent or expired entry is
//! a miss (`Ok(None)`), never an error. `put` resolves only once the entry is
//! durable for the backend, so callers can respond after awaiting it.
//! Entries nobody reads again are reclaimed by `purge_expired`, which the
//! lifecycle actor calls on a fixed interval.

use crate::{CacheKey, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub mod disk;
pub mod memory;

pub use disk::DiskCache;
pub use memory::MemoryCache;

#[async_trait]
pub trait RenderCache: Send + Sync {
    /// Fetch the payload stored under `key`, if present and unexpired.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>>;

    /// Store `bytes` under `key` for `ttl`, replacing any previous entry.
    async fn put(&self, key: &CacheKey, bytes: Bytes, ttl: Duration) -> Result<()>;

    /// Remove the entry under `key`. Returns whether an entry was removed.
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}
