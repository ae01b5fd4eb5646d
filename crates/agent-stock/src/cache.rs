//! Report cache with TTL expiry and sequence-ordered writes
//!
//! Two stores implement [`CacheStore`]:
//!
//! - [`MemoryCache`]: sharded in-memory map; reads and writes on distinct keys
//!   never contend on a global lock.
//! - [`FileCache`]: a `MemoryCache` mirrored to a JSON snapshot on disk.
//!
//! Every write carries a sequence number from a monotonic counter. A write
//! only replaces an existing entry when its sequence number is higher, so a
//! slow writer finishing after a newer one cannot resurrect stale data.

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StockError};
use agent_core::{AnalysisRequest, Depth};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Cache key for analysis results
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Normalized ticker symbol
    pub ticker: String,
    /// What was computed, e.g. a full report
    pub kind: String,
    pub depth: Depth,
}

impl CacheKey {
    /// Kind used for complete analysis reports
    pub const REPORT: &'static str = "report";

    pub fn new(ticker: impl AsRef<str>, kind: impl Into<String>, depth: Depth) -> Self {
        Self {
            ticker: ticker.as_ref().trim().to_ascii_uppercase(),
            kind: kind.into(),
            depth,
        }
    }

    /// Key for the full report of `request`
    pub fn for_request(request: &AnalysisRequest) -> Self {
        Self::new(request.ticker(), Self::REPORT, request.depth())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.ticker, self.kind, self.depth)
    }
}

impl FromStr for CacheKey {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ticker), Some(kind), Some(depth)) if !ticker.is_empty() => {
                let depth = depth
                    .parse::<Depth>()
                    .map_err(|e| StockError::CacheIo(format!("bad cache key {s}: {e}")))?;
                Ok(Self::new(ticker, kind, depth))
            }
            _ => Err(StockError::CacheIo(format!("bad cache key {s}"))),
        }
    }
}

/// One stored value
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub seq: u64,
}

impl CacheEntry {
    /// Expired once strictly more than `ttl` has elapsed since creation
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(self.ttl) else {
            return false;
        };
        now.signed_duration_since(self.created_at) > ttl
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Keyed store consulted before any analysis is launched
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Live payload for `key`; expired entries read as a miss and are evicted
    async fn get(&self, key: &CacheKey) -> Result<Option<serde_json::Value>>;

    /// Take the next write sequence number
    fn reserve_seq(&self) -> u64;

    /// Store `payload` under `key` unless a write with a higher sequence
    /// number already landed. Returns whether the write became visible.
    async fn commit(
        &self,
        key: CacheKey,
        payload: serde_json::Value,
        ttl: Duration,
        seq: u64,
    ) -> Result<bool>;

    async fn set(&self, key: CacheKey, payload: serde_json::Value, ttl: Duration) -> Result<()> {
        let seq = self.reserve_seq();
        self.commit(key, payload, ttl, seq).await.map(|_| ())
    }

    /// Remove `key`; returns whether an entry existed
    async fn invalidate(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every expired entry; returns how many were removed
    async fn sweep(&self) -> Result<usize>;

    async fn clear(&self) -> Result<()>;

    /// Number of stored entries, expired ones included until swept
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> CacheStats;
}

/// In-memory cache store
pub struct MemoryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    seq: AtomicU64,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            seq: AtomicU64::new(1),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let now = self.clock.now();

        // The read guard must be released before evicting from the same shard
        let live = match self.entries.get(key) {
            None => None,
            Some(entry) if entry.is_expired(now) => {
                drop(entry);
                if self
                    .entries
                    .remove_if(key, |_, e| e.is_expired(now))
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "evicted expired cache entry");
                }
                None
            }
            Some(entry) => Some(entry.payload.clone()),
        };

        if live.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        live
    }

    fn store(&self, key: CacheKey, payload: serde_json::Value, ttl: Duration, seq: u64) -> bool {
        let entry = CacheEntry {
            payload,
            created_at: self.clock.now(),
            ttl,
            seq,
        };
        self.insert_entry(key, entry)
    }

    fn insert_entry(&self, key: CacheKey, entry: CacheEntry) -> bool {
        // Keep the counter ahead of anything loaded from disk
        self.seq.fetch_max(entry.seq + 1, Ordering::Relaxed);

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().seq < entry.seq {
                    occupied.insert(entry);
                    true
                } else {
                    debug!(
                        key = %occupied.key(),
                        stale_seq = entry.seq,
                        current_seq = occupied.get().seq,
                        "dropped out-of-order cache write"
                    );
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    fn remove_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn snapshot(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<serde_json::Value>> {
        Ok(self.lookup(key))
    }

    fn reserve_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    async fn commit(
        &self,
        key: CacheKey,
        payload: serde_json::Value,
        ttl: Duration,
        seq: u64,
    ) -> Result<bool> {
        Ok(self.store(key, payload, ttl, seq))
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn sweep(&self) -> Result<usize> {
        Ok(self.remove_expired())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

/// On-disk form of one entry
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    ttl_secs: f64,
    seq: u64,
}

/// Cache store persisted to a JSON file
///
/// The file is loaded once on open and rewritten after every mutation by
/// writing a sibling temp file and renaming it over the original.
pub struct FileCache {
    memory: MemoryCache,
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCache {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        let memory = MemoryCache::with_clock(clock);

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: BTreeMap<String, StoredEntry> = serde_json::from_slice(&bytes)
                    .map_err(|e| {
                        StockError::CacheIo(format!("corrupt cache file {}: {e}", path.display()))
                    })?;
                let mut loaded = 0usize;
                for (raw_key, entry) in stored {
                    let key = match raw_key.parse::<CacheKey>() {
                        Ok(key) => key,
                        Err(e) => {
                            warn!(error = %e, "skipping unreadable cache entry");
                            continue;
                        }
                    };
                    let Ok(ttl) = Duration::try_from_secs_f64(entry.ttl_secs) else {
                        warn!(key = %key, "skipping cache entry with invalid ttl");
                        continue;
                    };
                    memory.insert_entry(
                        key,
                        CacheEntry {
                            payload: entry.payload,
                            created_at: entry.created_at,
                            ttl,
                            seq: entry.seq,
                        },
                    );
                    loaded += 1;
                }
                debug!(path = %path.display(), loaded, "loaded cache snapshot");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StockError::CacheIo(format!(
                    "cannot read cache file {}: {e}",
                    path.display()
                )));
            }
        }

        Ok(Self {
            memory,
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let stored: BTreeMap<String, StoredEntry> = self
            .memory
            .snapshot()
            .into_iter()
            .map(|(key, entry)| {
                (
                    key.to_string(),
                    StoredEntry {
                        payload: entry.payload,
                        created_at: entry.created_at,
                        ttl_secs: entry.ttl.as_secs_f64(),
                        seq: entry.seq,
                    },
                )
            })
            .collect();
        let bytes = serde_json::to_vec_pretty(&stored)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StockError::CacheIo(format!("{}: {e}", parent.display())))?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StockError::CacheIo(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StockError::CacheIo(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FileCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<serde_json::Value>> {
        let evictions = self.memory.evictions.load(Ordering::Relaxed);
        let value = self.memory.lookup(key);
        if self.memory.evictions.load(Ordering::Relaxed) != evictions {
            self.persist().await?;
        }
        Ok(value)
    }

    fn reserve_seq(&self) -> u64 {
        self.memory.reserve_seq()
    }

    async fn commit(
        &self,
        key: CacheKey,
        payload: serde_json::Value,
        ttl: Duration,
        seq: u64,
    ) -> Result<bool> {
        let applied = self.memory.store(key, payload, ttl, seq);
        if applied {
            self.persist().await?;
        }
        Ok(applied)
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.memory.entries.remove(key).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn sweep(&self) -> Result<usize> {
        let removed = self.memory.remove_expired();
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.memory.entries.clear();
        self.persist().await
    }

    fn len(&self) -> usize {
        self.memory.entries.len()
    }

    fn stats(&self) -> CacheStats {
        self.memory.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn cache_with_clock() -> (MemoryCache, ManualClock) {
        let clock = ManualClock::default();
        (MemoryCache::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = AnalysisRequest::new("Apple", "aapl");
        let b = AnalysisRequest::new("Apple Inc.", " AAPL ");
        assert_eq!(CacheKey::for_request(&a), CacheKey::for_request(&b));
        assert_eq!(CacheKey::for_request(&a).to_string(), "AAPL|report|standard");

        let deep = a.clone().with_depth(Depth::Deep);
        assert_ne!(CacheKey::for_request(&a), CacheKey::for_request(&deep));
    }

    #[test]
    fn test_cache_key_parses_its_display_form() {
        let key = CacheKey::new("BRK.B", "report", Depth::Quick);
        let parsed: CacheKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
        assert!("nonsense".parse::<CacheKey>().is_err());
    }

    #[tokio::test]
    async fn test_cache_insert_and_get() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("AAPL", CacheKey::REPORT, Depth::Standard);
        let value = json!({"score": 81.0});

        cache
            .set(key.clone(), value.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), Some(value));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_entry_is_live_at_ttl_and_gone_after() {
        let (cache, clock) = cache_with_clock();
        let key = CacheKey::new("MSFT", CacheKey::REPORT, Depth::Standard);
        let ttl = Duration::from_secs(300);

        cache.set(key.clone(), json!(1), ttl).await.unwrap();

        clock.advance(ttl);
        assert!(cache.get(&key).await.unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert!(cache.get(&key).await.unwrap().is_none());
        assert_eq!(cache.len(), 0, "expired entry is evicted lazily");
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_no_entry_outlives_its_ttl() {
        let (cache, clock) = cache_with_clock();
        let ttls = [0u64, 1, 5, 17, 60, 61, 300];

        for (i, ttl) in ttls.iter().enumerate() {
            let key = CacheKey::new(format!("T{i}"), CacheKey::REPORT, Depth::Quick);
            cache
                .set(key, json!(i), Duration::from_secs(*ttl))
                .await
                .unwrap();
        }

        for elapsed in 0..=310u64 {
            for (i, ttl) in ttls.iter().enumerate() {
                let key = CacheKey::new(format!("T{i}"), CacheKey::REPORT, Depth::Quick);
                let hit = cache.get(&key).await.unwrap().is_some();
                if elapsed > *ttl {
                    assert!(!hit, "T{i} returned at age {elapsed}s with ttl {ttl}s");
                }
            }
            clock.advance(Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn test_out_of_order_commit_keeps_newer_write() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("NVDA", CacheKey::REPORT, Depth::Standard);
        let ttl = Duration::from_secs(60);

        let older = cache.reserve_seq();
        let newer = cache.reserve_seq();
        assert!(newer > older);

        assert!(
            cache
                .commit(key.clone(), json!("new"), ttl, newer)
                .await
                .unwrap()
        );
        assert!(
            !cache
                .commit(key.clone(), json!("old"), ttl, older)
                .await
                .unwrap()
        );
        assert_eq!(cache.get(&key).await.unwrap(), Some(json!("new")));
    }

    #[tokio::test]
    async fn test_sweep_and_invalidate() {
        let (cache, clock) = cache_with_clock();
        let short = CacheKey::new("A", CacheKey::REPORT, Depth::Standard);
        let long = CacheKey::new("B", CacheKey::REPORT, Depth::Standard);

        cache
            .set(short.clone(), json!(1), Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .set(long.clone(), json!(2), Duration::from_secs(1000))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(11));
        assert_eq!(cache.sweep().await.unwrap(), 1);
        assert_eq!(cache.len(), 1);

        assert!(cache.invalidate(&long).await.unwrap());
        assert!(!cache.invalidate(&long).await.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_distinct_keys() {
        let cache = Arc::new(MemoryCache::new());
        let mut handles = Vec::new();

        for i in 0..64 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let key = CacheKey::new(format!("K{i}"), CacheKey::REPORT, Depth::Standard);
                cache
                    .set(key.clone(), json!(i), Duration::from_secs(60))
                    .await
                    .unwrap();
                cache.get(&key).await.unwrap()
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Some(json!(i)));
        }
        assert_eq!(cache.len(), 64);
    }

    #[tokio::test]
    async fn test_file_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("reports.json");
        let key = CacheKey::new("AAPL", CacheKey::REPORT, Depth::Standard);

        {
            let cache = FileCache::open(&path).await.unwrap();
            cache
                .set(key.clone(), json!({"score": 77}), Duration::from_secs(3600))
                .await
                .unwrap();
        }
        assert!(path.exists());

        let reopened = FileCache::open(&path).await.unwrap();
        assert_eq!(reopened.get(&key).await.unwrap(), Some(json!({"score": 77})));

        // Sequence numbers continue past what was loaded
        let seq = reopened.reserve_seq();
        assert!(seq > 1);
    }

    #[tokio::test]
    async fn test_file_cache_expiry_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");
        let clock = ManualClock::default();
        let key = CacheKey::new("TSLA", CacheKey::REPORT, Depth::Quick);

        let cache = FileCache::open_with_clock(&path, Arc::new(clock.clone()))
            .await
            .unwrap();
        cache
            .set(key.clone(), json!(1), Duration::from_secs(5))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.sweep().await.unwrap(), 1);

        let reopened = FileCache::open_with_clock(&path, Arc::new(clock))
            .await
            .unwrap();
        assert!(reopened.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_cache_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileCache::open(&path).await.err().unwrap();
        assert!(matches!(err, StockError::CacheIo(_)));
    }
}
