//! Disk-backed lookup cache with TTL and negative entries
//!
//! One JSON file per key under the cache directory. Keys are the first 16
//! bytes of `sha256(lowercase(trim("title|artist|album")))`, hex encoded.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::SourceError;
use crate::models::VideoInfo;

/// Default time-to-live for cache entries
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Duration value marking a confirmed "not found"
pub const NOT_FOUND_SENTINEL: i64 = -1;

/// Records stored in a [`PersistentCache`] expose their capture time
pub trait CacheRecord: Serialize + DeserializeOwned + Send + Sync {
    fn cached_at(&self) -> DateTime<Utc>;
}

/// Entry/expired counts, computed without evicting anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub expired: usize,
}

/// Cache key for a normalized (title, artist, album) triple
pub fn cache_key(title: &str, artist: &str, album: &str) -> String {
    let normalized = format!("{}|{}|{}", title, artist, album).trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// File-per-key JSON cache guarded by an async read/write lock
pub struct PersistentCache<E> {
    dir: PathBuf,
    ttl: Duration,
    lock: RwLock<()>,
    _record: PhantomData<fn() -> E>,
}

impl<E: CacheRecord> PersistentCache<E> {
    /// Open (and create) a cache directory
    pub fn open(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, SourceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| SourceError::Cache(format!("create {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            ttl,
            lock: RwLock::new(()),
            _record: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn is_expired(&self, record: &E, now: DateTime<Utc>) -> bool {
        now - record.cached_at() > self.ttl
    }

    /// Fetch a live entry; expired entries are deleted and reported as a miss
    pub async fn get(&self, key: &str) -> Option<E> {
        let path = self.entry_path(key);

        let record = {
            let _guard = self.lock.read().await;
            let bytes = tokio::fs::read(&path).await.ok()?;
            match serde_json::from_slice::<E>(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Unreadable cache entry, ignoring");
                    return None;
                }
            }
        };

        if self.is_expired(&record, Utc::now()) {
            let _guard = self.lock.write().await;
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::debug!(key = %key, error = %e, "Expired cache entry already gone");
            }
            return None;
        }

        Some(record)
    }

    /// Store (or replace) an entry
    pub async fn put(&self, key: &str, record: &E) -> Result<(), SourceError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| SourceError::Cache(format!("serialize: {}", e)))?;

        let _guard = self.lock.write().await;
        tokio::fs::write(self.entry_path(key), json)
            .await
            .map_err(|e| SourceError::Cache(format!("write {}: {}", key, e)))
    }

    /// Remove every entry; returns how many were deleted
    pub async fn clear(&self) -> Result<usize, SourceError> {
        let _guard = self.lock.write().await;
        let mut removed = 0;
        for path in self.entry_paths().await? {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| SourceError::Cache(format!("remove {}: {}", path.display(), e)))?;
            removed += 1;
        }
        tracing::info!(dir = %self.dir.display(), removed, "Cache cleared");
        Ok(removed)
    }

    /// Count entries and expired entries
    pub async fn stats(&self) -> Result<CacheStats, SourceError> {
        let _guard = self.lock.read().await;
        let now = Utc::now();
        let mut stats = CacheStats::default();

        for path in self.entry_paths().await? {
            stats.total += 1;
            let expired = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<E>(&bytes)
                    .map(|record| self.is_expired(&record, now))
                    .unwrap_or(true),
                Err(_) => true,
            };
            if expired {
                stats.expired += 1;
            }
        }

        Ok(stats)
    }

    async fn entry_paths(&self) -> Result<Vec<PathBuf>, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| SourceError::Cache(format!("read {}: {}", self.dir.display(), e)))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::Cache(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Video-platform duration lookup result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationCacheEntry {
    pub query: String,
    /// Seconds, or [`NOT_FOUND_SENTINEL`]
    pub duration: i64,
    #[serde(default)]
    pub video_id: String,
    #[serde(default)]
    pub video_title: String,
    #[serde(default)]
    pub match_score: f64,
    pub cached_at: DateTime<Utc>,
}

impl DurationCacheEntry {
    pub fn is_not_found(&self) -> bool {
        self.duration == NOT_FOUND_SENTINEL
    }
}

impl CacheRecord for DurationCacheEntry {
    fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }
}

/// Web search results for one (title, artist) query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCacheEntry {
    pub query: String,
    pub results: Vec<VideoInfo>,
    pub cached_at: DateTime<Utc>,
}

impl CacheRecord for SearchCacheEntry {
    fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }
}

pub type DurationCache = PersistentCache<DurationCacheEntry>;
pub type SearchCache = PersistentCache<SearchCacheEntry>;

impl DurationCache {
    /// Look up a (title, artist, album) triple
    pub async fn lookup(&self, title: &str, artist: &str, album: &str) -> Option<DurationCacheEntry> {
        self.get(&cache_key(title, artist, album)).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn store_found(
        &self,
        title: &str,
        artist: &str,
        album: &str,
        duration: i64,
        video_id: &str,
        video_title: &str,
        match_score: f64,
    ) -> Result<(), SourceError> {
        let entry = DurationCacheEntry {
            query: format!("{} {} {}", title, artist, album).trim().to_string(),
            duration,
            video_id: video_id.to_string(),
            video_title: video_title.to_string(),
            match_score,
            cached_at: Utc::now(),
        };
        self.put(&cache_key(title, artist, album), &entry).await
    }

    /// Record a confirmed miss so the next lookup skips the network
    pub async fn store_not_found(&self, title: &str, artist: &str, album: &str) -> Result<(), SourceError> {
        let entry = DurationCacheEntry {
            query: format!("{} {} {}", title, artist, album).trim().to_string(),
            duration: NOT_FOUND_SENTINEL,
            video_id: String::new(),
            video_title: String::new(),
            match_score: 0.0,
            cached_at: Utc::now(),
        };
        self.put(&cache_key(title, artist, album), &entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> DurationCache {
        DurationCache::open(dir.path(), Duration::days(DEFAULT_TTL_DAYS)).unwrap()
    }

    #[test]
    fn test_cache_key_is_normalized_and_16_bytes() {
        let a = cache_key("Bohemian Rhapsody", "Queen", "A Night at the Opera");
        let b = cache_key("BOHEMIAN RHAPSODY", "queen", "a night at the opera");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, cache_key("Bohemian Rhapsody", "Queen", ""));
    }

    #[tokio::test]
    async fn test_put_then_get_returns_entry() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache
            .store_found("Song", "Band", "Album", 215, "abcdefghijk", "Band - Song", 0.92)
            .await
            .unwrap();

        let entry = cache.lookup("Song", "Band", "Album").await.unwrap();
        assert_eq!(entry.duration, 215);
        assert_eq!(entry.video_id, "abcdefghijk");
        assert!(!entry.is_not_found());
        assert!(dir.path().join(format!("{}.json", cache_key("Song", "Band", "Album"))).exists());
    }

    #[tokio::test]
    async fn test_negative_entry() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert!(cache.lookup("Missing", "Nobody", "").await.is_none());
        cache.store_not_found("Missing", "Nobody", "").await.unwrap();

        let entry = cache.lookup("Missing", "Nobody", "").await.unwrap();
        assert!(entry.is_not_found());
        assert_eq!(entry.duration, NOT_FOUND_SENTINEL);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_and_removed() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let key = cache_key("Old", "Band", "");

        let stale = DurationCacheEntry {
            query: "Old Band".to_string(),
            duration: 100,
            video_id: String::new(),
            video_title: String::new(),
            match_score: 0.5,
            cached_at: Utc::now() - Duration::days(31),
        };
        cache.put(&key, &stale).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats, CacheStats { total: 1, expired: 1 });

        assert!(cache.get(&key).await.is_none());
        assert!(!dir.path().join(format!("{}.json", key)).exists());
        assert_eq!(cache.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.store_found("A", "B", "", 100, "id", "t", 1.0).await.unwrap();
        cache.store_not_found("C", "D", "").await.unwrap();
        assert_eq!(cache.clear().await.unwrap(), 2);

        assert!(cache.lookup("A", "B", "").await.is_none());
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let key = cache_key("X", "Y", "");
        std::fs::write(dir.path().join(format!("{}.json", key)), "not json").unwrap();
        assert!(cache.get(&key).await.is_none());
    }
}
