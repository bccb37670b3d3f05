//! In-memory LRU + TTL caches shared by concurrent searches.
//!
//! Entries remember their wall-clock insertion time so that a snapshot
//! restored after a restart still expires on schedule.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use moka::{Expiry, policy::EvictionPolicy, sync::Cache};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{info, warn};

use crate::{
    analyzer::FusionWeights,
    backend::Strategy,
    cache_store::{CacheStore, CacheTable},
    config::EngineConfig,
    engine::SearchHit,
    error::Result,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Milliseconds since the Unix epoch.
    pub inserted_at: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            inserted_at: now_millis(),
        }
    }

    /// Time left before `ttl` elapses, zero once expired.
    pub fn remaining(&self, ttl: Duration) -> Duration {
        let age = now_millis().saturating_sub(self.inserted_at);
        ttl.saturating_sub(Duration::from_millis(age))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

struct WallClockExpiry {
    ttl: Duration,
}

impl<V> Expiry<String, CacheEntry<V>> for WallClockExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining(self.ttl))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining(self.ttl))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded cache with least-recently-used eviction and a fixed TTL.
pub struct TtlLruCache<V> {
    inner: Cache<String, CacheEntry<V>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> TtlLruCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(WallClockExpiry { ttl })
            .build();
        Self {
            inner,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let found = self
            .inner
            .get(key)
            .filter(|entry| !entry.remaining(self.ttl).is_zero());

        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, value: V) {
        self.inner.insert(key, CacheEntry::new(value));
    }

    /// Re-insert an entry with its original timestamp. Returns `false` and
    /// drops the entry if it has already expired.
    pub fn restore(&self, key: String, entry: CacheEntry<V>) -> bool {
        if entry.remaining(self.ttl).is_zero() {
            return false;
        }
        self.inner.insert(key, entry);
        true
    }

    /// Live entries, for snapshotting.
    pub fn entries(&self) -> Vec<(String, CacheEntry<V>)> {
        self.inner
            .iter()
            .filter(|(_, entry)| !entry.remaining(self.ttl).is_zero())
            .map(|(key, entry)| (key.as_ref().clone(), entry))
            .collect()
    }

    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// A finished search as stored in the result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSearch {
    pub hits: Vec<SearchHit>,
    pub launched: usize,
    pub contributing: Vec<Strategy>,
    pub reranked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheServiceStats {
    pub results: CacheStats,
    pub hypothetical: CacheStats,
    pub rerank: CacheStats,
}

/// The three logical caches used by the engine.
pub struct CacheService {
    results: TtlLruCache<CachedSearch>,
    hypothetical: TtlLruCache<String>,
    rerank: TtlLruCache<Vec<(String, f64)>>,
}

impl CacheService {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            results: TtlLruCache::new(capacity, ttl),
            hypothetical: TtlLruCache::new(capacity, ttl),
            rerank: TtlLruCache::new(capacity, ttl),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.cache_capacity, config.cache_ttl())
    }

    /// Fused and possibly reranked result sets.
    pub fn results(&self) -> &TtlLruCache<CachedSearch> {
        &self.results
    }

    /// Generated hypothetical answers, keyed by normalized query only.
    pub fn hypothetical(&self) -> &TtlLruCache<String> {
        &self.hypothetical
    }

    /// Reranked head orderings as `(doc_id, normalized score)`.
    pub fn rerank(&self) -> &TtlLruCache<Vec<(String, f64)>> {
        &self.rerank
    }

    pub fn stats(&self) -> CacheServiceStats {
        CacheServiceStats {
            results: self.results.stats(),
            hypothetical: self.hypothetical.stats(),
            rerank: self.rerank.stats(),
        }
    }

    pub fn invalidate_all(&self) {
        self.results.clear();
        self.hypothetical.clear();
        self.rerank.clear();
    }

    /// Warm the caches from a snapshot. Unreadable tables and malformed or
    /// expired rows are skipped. Returns the number of entries restored.
    pub fn load_from(&self, store: &CacheStore) -> usize {
        let restored = restore_table(store, CacheTable::Results, &self.results)
            + restore_table(store, CacheTable::Hypothetical, &self.hypothetical)
            + restore_table(store, CacheTable::Rerank, &self.rerank);
        info!(restored, "loaded cache snapshot");
        restored
    }

    /// Write every live entry to the snapshot, replacing what was there.
    pub fn persist_to(&self, store: &CacheStore) -> Result<()> {
        store.replace(CacheTable::Results, &snapshot_rows(&self.results)?)?;
        store.replace(
            CacheTable::Hypothetical,
            &snapshot_rows(&self.hypothetical)?,
        )?;
        store.replace(CacheTable::Rerank, &snapshot_rows(&self.rerank)?)?;
        info!("persisted cache snapshot");
        Ok(())
    }
}

fn snapshot_rows<V>(cache: &TtlLruCache<V>) -> Result<Vec<(String, String)>>
where
    V: Clone + Send + Sync + Serialize + 'static,
{
    cache
        .entries()
        .into_iter()
        .map(|(key, entry)| Ok((key, serde_json::to_string(&entry)?)))
        .collect()
}

fn restore_table<V>(
    store: &CacheStore,
    table: CacheTable,
    cache: &TtlLruCache<V>,
) -> usize
where
    V: Clone + Send + Sync + DeserializeOwned + 'static,
{
    let rows = match store.load(table) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(table = table.name(), error = %e, "unreadable cache table");
            return 0;
        }
    };

    let mut restored = 0;
    for (key, raw) in rows {
        match serde_json::from_str::<CacheEntry<V>>(&raw) {
            Ok(entry) => {
                if cache.restore(key, entry) {
                    restored += 1;
                }
            }
            Err(e) => {
                warn!(
                    table = table.name(),
                    key = %key,
                    error = %e,
                    "discarding malformed cache entry"
                );
            }
        }
    }
    restored
}

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().to_hex().to_string()
}

/// Key for a full result set.
pub fn result_key(
    normalized_query: &str,
    k: usize,
    strategy_set: &str,
    weights: FusionWeights,
    use_reranker: bool,
) -> String {
    digest(&[
        b"results",
        normalized_query.as_bytes(),
        &(k as u64).to_le_bytes(),
        strategy_set.as_bytes(),
        &weights.vector.to_bits().to_le_bytes(),
        &weights.keyword.to_bits().to_le_bytes(),
        &[u8::from(use_reranker)],
    ])
}

pub fn hypothetical_key(normalized_query: &str) -> String {
    digest(&[b"hypothetical", normalized_query.as_bytes()])
}

pub fn rerank_key(normalized_query: &str, doc_ids: &[&str]) -> String {
    let mut parts: Vec<&[u8]> = vec![b"rerank", normalized_query.as_bytes()];
    parts.extend(doc_ids.iter().map(|id| id.as_bytes()));
    digest(&parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str) -> SearchHit {
        SearchHit {
            doc_id: id.to_string(),
            text: format!("text {id}"),
            metadata: Default::default(),
            score: 1.0,
        }
    }

    fn cached(ids: &[&str]) -> CachedSearch {
        CachedSearch {
            hits: ids.iter().map(|id| hit(id)).collect(),
            launched: 2,
            contributing: vec![Strategy::Vector, Strategy::Keyword],
            reranked: false,
        }
    }

    #[test]
    fn get_after_insert_counts_hits_and_misses() {
        let cache: TtlLruCache<String> =
            TtlLruCache::new(10, Duration::from_secs(60));
        assert_eq!(cache.get("q"), None);
        cache.insert("q".into(), "answer".into());
        assert_eq!(cache.get("q"), Some("answer".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache: TtlLruCache<String> =
            TtlLruCache::new(10, Duration::from_millis(50));
        cache.insert("q".into(), "answer".into());
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.get("q"), None);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache: TtlLruCache<u32> =
            TtlLruCache::new(2, Duration::from_secs(60));
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.inner.run_pending_tasks();
        assert_eq!(cache.get("a"), Some(1));
        cache.inner.run_pending_tasks();

        cache.insert("c".into(), 3);
        cache.inner.run_pending_tasks();

        assert!(cache.len() <= 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn restore_rejects_expired_entries() {
        let cache: TtlLruCache<u32> =
            TtlLruCache::new(10, Duration::from_secs(60));
        let stale = CacheEntry {
            value: 7,
            inserted_at: 0,
        };
        assert!(!cache.restore("old".into(), stale));
        assert!(cache.restore("new".into(), CacheEntry::new(8)));
        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("new"), Some(8));
    }

    #[test]
    fn result_keys_separate_parameters() {
        let w = FusionWeights::balanced();
        let base = result_key("what is rust", 5, "v1", w, true);
        assert_eq!(base, result_key("what is rust", 5, "v1", w, true));
        assert_ne!(base, result_key("what is rust", 6, "v1", w, true));
        assert_ne!(base, result_key("what is rust", 5, "v2", w, true));
        assert_ne!(base, result_key("what is rust", 5, "v1", w, false));
        let skewed = FusionWeights::normalized(0.8, 0.2);
        assert_ne!(base, result_key("what is rust", 5, "v1", skewed, true));
    }

    #[test]
    fn rerank_key_depends_on_order() {
        assert_ne!(rerank_key("q", &["a", "b"]), rerank_key("q", &["b", "a"]));
        assert_ne!(rerank_key("q", &["ab"]), rerank_key("q", &["a", "b"]));
    }

    #[test]
    fn invalidate_all_empties_every_cache() {
        let service = CacheService::new(10, Duration::from_secs(60));
        service.results().insert("r".into(), cached(&["a"]));
        service.hypothetical().insert("h".into(), "text".into());
        service.rerank().insert("x".into(), vec![("a".into(), 1.0)]);

        service.invalidate_all();

        let stats = service.stats();
        assert_eq!(stats.results.entries, 0);
        assert_eq!(stats.hypothetical.entries, 0);
        assert_eq!(stats.rerank.entries, 0);
    }

    #[test]
    fn snapshot_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&tmp.path().join("cache.redb")).unwrap();

        let service = CacheService::new(10, Duration::from_secs(60));
        service.results().insert("r".into(), cached(&["a", "b"]));
        service.hypothetical().insert("h".into(), "hyde".into());
        service.persist_to(&store).unwrap();

        let warm = CacheService::new(10, Duration::from_secs(60));
        assert_eq!(warm.load_from(&store), 2);
        assert_eq!(warm.results().get("r"), Some(cached(&["a", "b"])));
        assert_eq!(warm.hypothetical().get("h"), Some("hyde".to_string()));
    }

    #[test]
    fn malformed_rows_are_discarded_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&tmp.path().join("cache.redb")).unwrap();
        let good = serde_json::to_string(&CacheEntry::new("ok".to_string()))
            .unwrap();
        store
            .replace(
                CacheTable::Hypothetical,
                &[
                    ("good".to_string(), good),
                    ("bad".to_string(), "{not json".to_string()),
                ],
            )
            .unwrap();

        let service = CacheService::new(10, Duration::from_secs(60));
        assert_eq!(service.load_from(&store), 1);
        assert_eq!(service.hypothetical().get("good"), Some("ok".to_string()));
        assert_eq!(service.hypothetical().get("bad"), None);
    }
}
