//! On-disk cache backend
//!
//! One file per key: an 8-byte big-endian unix-seconds expiry header followed
//! by the payload. Writes land in a temporary file that is fsynced and then
//! renamed over the final path, so readers never observe partial entries.

use super::RenderCache;
use crate::{CacheKey, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const HEADER_LEN: usize = 8;

pub struct DiskCache {
    dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl DiskCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.bin", key))
    }

    fn tmp_path(&self, key: &CacheKey) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".{}.{}.{}.tmp", key, std::process::id(), seq))
    }
}

/// Expiry header of the entry at `path`; `None` when the file is too short
/// to carry one.
async fn read_expiry(path: &Path) -> std::io::Result<Option<u64>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = [0u8; HEADER_LEN];
    match file.read_exact(&mut header).await {
        Ok(_) => Ok(Some(u64::from_be_bytes(header))),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl RenderCache for DiskCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let path = self.entry_path(key);
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if data.len() < HEADER_LEN {
            warn!("disk cache entry {} is truncated; discarding", key);
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&data[..HEADER_LEN]);
        let expires_at = u64::from_be_bytes(header);
        if unix_now() >= expires_at {
            debug!("disk cache entry {} expired", key);
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        let mut bytes = Bytes::from(data);
        Ok(Some(bytes.split_off(HEADER_LEN)))
    }

    async fn put(&self, key: &CacheKey, bytes: Bytes, ttl: Duration) -> Result<()> {
        let expires_at = unix_now().saturating_add(ttl.as_secs());
        let tmp = self.tmp_path(key);

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&expires_at.to_be_bytes()).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, self.entry_path(key)).await
        };

        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Cache(format!("failed to write entry {}: {}", key, e)));
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = unix_now();
        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "bin") {
                continue;
            }
            let expired = match read_expiry(&path).await {
                Ok(Some(expires_at)) => now >= expires_at,
                Ok(None) => true,
                // Removed by a concurrent delete
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !expired {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed > 0 {
            debug!("disk cache purged {} expired entries", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint;

    #[tokio::test]
    async fn round_trip_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = fingerprint("page");
        {
            let cache = DiskCache::open(dir.path()).await.unwrap();
            cache
                .put(&key, Bytes::from_static(b"\xff\xd8\xff"), Duration::from_secs(3600))
                .await
                .unwrap();
            assert_eq!(cache.get(&key).await.unwrap().unwrap(), &b"\xff\xd8\xff"[..]);
        }

        let reopened = DiskCache::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(&key).await.unwrap().unwrap(), &b"\xff\xd8\xff"[..]);
    }

    #[tokio::test]
    async fn zero_ttl_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();
        let key = fingerprint("gone");
        cache
            .put(&key, Bytes::from_static(b"x"), Duration::ZERO)
            .await
            .unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(!cache.entry_path(&key).exists());
    }

    #[tokio::test]
    async fn delete_and_truncated_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();
        let key = fingerprint("k");
        cache
            .put(&key, Bytes::from_static(b"data"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.delete(&key).await.unwrap());
        assert!(!cache.delete(&key).await.unwrap());

        std::fs::write(cache.entry_path(&key), b"abc").unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_expired_and_truncated_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();
        let live = fingerprint("live");
        cache
            .put(&live, Bytes::from_static(b"keep"), Duration::from_secs(3600))
            .await
            .unwrap();
        for name in ["old-1", "old-2"] {
            cache
                .put(&fingerprint(name), Bytes::from_static(b"stale"), Duration::ZERO)
                .await
                .unwrap();
        }
        std::fs::write(cache.entry_path(&fingerprint("short")), b"abc").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not an entry").unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 3);
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
        assert!(cache.entry_path(&live).exists());
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(cache.get(&live).await.unwrap().unwrap(), &b"keep"[..]);
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();
        for i in 0..3 {
            cache
                .put(&fingerprint(&i.to_string()), Bytes::from(vec![i as u8; 16]), Duration::from_secs(60))
                .await
                .unwrap();
        }
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.ends_with(".bin")));
    }
}
