//! DNS answer cache with TTL-based expiration.
//!
//! A fixed number of shards, each an LRU map behind its own mutex, so
//! concurrent requests for different names rarely contend. Lookups never
//! return an entry at or past its expiry.

use hickory_proto::op::Message;
use lru::LruCache;
use rustc_hash::FxBuildHasher;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::dns::DnsQuery;

/// Number of shards a capacity is split over.
pub const SHARDS: usize = 8;

struct CacheEntry {
    response: Message,
    expires_at: Instant,
}

type Shard = LruCache<DnsQuery, CacheEntry, FxBuildHasher>;

/// Sharded, TTL-aware LRU cache of accepted answers.
///
/// A disabled cache always misses and ignores stores.
pub struct AnswerCache {
    shards: Vec<Mutex<Shard>>,
    hasher: FxBuildHasher,
}

impl AnswerCache {
    /// `shards` maps of `shard_capacity` entries each. Either being zero
    /// yields a disabled cache.
    pub fn new(shards: usize, shard_capacity: usize) -> Self {
        let shards = match NonZeroUsize::new(shard_capacity) {
            Some(cap) => (0..shards)
                .map(|_| Mutex::new(LruCache::with_hasher(cap, FxBuildHasher)))
                .collect(),
            None => Vec::new(),
        };
        Self {
            shards,
            hasher: FxBuildHasher,
        }
    }

    /// Split a total capacity over [`SHARDS`] shards.
    ///
    /// Capacities of `SHARDS` entries or fewer disable the cache.
    pub fn with_capacity(capacity: usize) -> Self {
        if capacity <= SHARDS {
            return Self::disabled();
        }
        Self::new(SHARDS, capacity / SHARDS)
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    pub fn is_enabled(&self) -> bool {
        !self.shards.is_empty()
    }

    fn shard(&self, key: &DnsQuery) -> Option<&Mutex<Shard>> {
        if self.shards.is_empty() {
            return None;
        }
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        self.shards.get(idx)
    }

    /// Look up a live entry. Expired entries are removed on the way out.
    pub fn get(&self, key: &DnsQuery) -> Option<Message> {
        let shard = self.shard(key)?;
        let now = Instant::now();

        let Ok(mut entries) = shard.lock() else {
            return None;
        };
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(entry.response.clone()),
            Some(_) => {}
            None => return None,
        }
        entries.pop(key);
        None
    }

    /// Store `response` for `ttl`. Last writer wins.
    pub fn put(&self, key: DnsQuery, response: Message, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let Some(shard) = self.shard(&key) else {
            return;
        };
        let Ok(mut entries) = shard.lock() else {
            return;
        };
        entries.put(
            key,
            CacheEntry {
                response,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let Ok(mut entries) = shard.lock() else {
                continue;
            };
            let expired: Vec<DnsQuery> = entries
                .iter()
                .filter(|(_, entry)| now >= entry.expires_at)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                entries.pop(key);
            }
            removed += expired.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().map(|e| e.len()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AnswerCache {
    fn default() -> Self {
        Self::disabled()
    }
}
