// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cookbook blob cache
//!
//! Blobs are content addressed by their MD5 checksum, so an entry never goes
//! stale. One cache is shared by every cookbook file of a server root and
//! dropped with it; there is no process-wide instance. The cache is bounded
//! both by entry count and by total bytes, evicting least recently used
//! blobs first.

use bytes::Bytes;
use cfs_core::BackendError;
use lru::LruCache;
use parking_lot::Mutex;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_BLOB_CACHE_ENTRIES: usize = 4096;
pub const DEFAULT_BLOB_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
}

struct Blobs {
    lru: LruCache<String, Bytes>,
    bytes: usize,
}

pub struct BlobCache {
    blobs: Mutex<Blobs>,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCache").field("stats", &self.stats()).finish()
    }
}

impl Default for BlobCache {
    fn default() -> Self {
        let entries = NonZeroUsize::new(DEFAULT_BLOB_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self::with_limits(entries, DEFAULT_BLOB_CACHE_BYTES)
    }
}

impl BlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache holding at most `max_entries` blobs and `max_bytes` of content
    pub fn with_limits(max_entries: NonZeroUsize, max_bytes: usize) -> Self {
        Self {
            blobs: Mutex::new(Blobs { lru: LruCache::new(max_entries), bytes: 0 }),
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, checksum: &str) -> Option<Bytes> {
        let found = self.blobs.lock().lru.get(checksum).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, checksum: impl Into<String>, content: Bytes) {
        let checksum = checksum.into();
        if content.len() > self.max_bytes {
            tracing::debug!("Not caching blob {}: {} bytes exceeds the cache size", checksum, content.len());
            return;
        }
        let mut blobs = self.blobs.lock();
        blobs.bytes += content.len();
        // `push` hands back either the value it replaced or the entry it evicted.
        if let Some((old_key, old)) = blobs.lru.push(checksum.clone(), content) {
            blobs.bytes -= old.len();
            if old_key != checksum {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        while blobs.bytes > self.max_bytes {
            let Some((_, old)) = blobs.lru.pop_lru() else {
                break;
            };
            blobs.bytes -= old.len();
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return the cached blob or run `fetch` and remember its result
    pub async fn get_or_fetch<F>(&self, checksum: &str, fetch: F) -> Result<Bytes, BackendError>
    where
        F: Future<Output = Result<Bytes, BackendError>>,
    {
        if let Some(content) = self.get(checksum) {
            return Ok(content);
        }
        let content = fetch.await?;
        self.insert(checksum, content.clone());
        Ok(content)
    }

    pub fn clear(&self) {
        let mut blobs = self.blobs.lock();
        blobs.lru.clear();
        blobs.bytes = 0;
    }

    pub fn stats(&self) -> BlobCacheStats {
        let blobs = self.blobs.lock();
        BlobCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: blobs.lru.len(),
            bytes: blobs.bytes,
        }
    }
}
