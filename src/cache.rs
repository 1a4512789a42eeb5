use crate::config::EngineConfig;
use crate::corpus::{CorpusListener, KeywordSnapshot};
use crate::error::{CacheError, MatcherBuildError};
use crate::matcher::CompiledMatcher;
use arc_swap::ArcSwapOption;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Key-value store shared by every serving process.
///
/// Implementations should fail fast; any error is treated as a miss.
pub trait SharedCacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;
    fn delete(&self, key: &str) -> Result<(), CacheError>;
    fn flush_all(&self) -> Result<(), CacheError>;
}

/// In-process stand-in for a networked key-value service.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SharedCacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn flush_all(&self) -> Result<(), CacheError> {
        self.entries.write().clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct RenderCacheEntry {
    generation: u64,
    html: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub generation: u64,
    pub tier1_hits: u64,
    pub tier2_hits: u64,
    pub misses: u64,
    pub tier2_errors: u64,
    pub matcher_builds: u64,
}

#[derive(Default)]
struct Counters {
    tier1_hits: AtomicU64,
    tier2_hits: AtomicU64,
    misses: AtomicU64,
    tier2_errors: AtomicU64,
    matcher_builds: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Two-tier cache of rendered descriptions plus the compiled matcher.
///
/// Tier 1 entries carry the generation they were rendered under and are
/// ignored once the corpus moves on. Tier 2 holds bare HTML and is flushed
/// on every corpus change.
pub struct CacheLayer {
    generation: AtomicU64,
    tier1: Mutex<LruCache<String, RenderCacheEntry>>,
    tier2: Arc<dyn SharedCacheStore>,
    key_prefix: String,
    matcher: ArcSwapOption<CompiledMatcher>,
    counters: Counters,
}

impl CacheLayer {
    pub fn new(config: &EngineConfig, tier2: Arc<dyn SharedCacheStore>) -> Self {
        Self::with_capacity(config.tier1_capacity, config.shared_key_prefix.clone(), tier2)
    }

    pub fn with_capacity(
        capacity: NonZeroUsize,
        key_prefix: String,
        tier2: Arc<dyn SharedCacheStore>,
    ) -> Self {
        Self {
            generation: AtomicU64::new(0),
            tier1: Mutex::new(LruCache::new(capacity)),
            tier2,
            key_prefix,
            matcher: ArcSwapOption::empty(),
            counters: Counters::default(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn shared_key(&self, keyword: &str) -> String {
        format!("{}{}", self.key_prefix, keyword)
    }

    /// Looks up a rendered description for `keyword` at `generation`.
    pub fn get(&self, keyword: &str, generation: u64) -> Option<String> {
        if generation != self.generation() {
            bump(&self.counters.misses);
            return None;
        }

        if let Some(entry) = self.tier1.lock().get(keyword) {
            if entry.generation == generation {
                bump(&self.counters.tier1_hits);
                debug!(keyword, generation, "tier 1 hit");
                return Some(entry.html.clone());
            }
        }

        match self.tier2.get(&self.shared_key(keyword)) {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(html) => {
                    bump(&self.counters.tier2_hits);
                    debug!(keyword, generation, "tier 2 hit");
                    self.store_tier1(keyword, generation, html.clone());
                    return Some(html);
                }
                Err(err) => {
                    warn!(keyword, error = %err, "discarding non UTF-8 shared cache entry");
                }
            },
            Ok(None) => {}
            Err(err) => {
                bump(&self.counters.tier2_errors);
                warn!(keyword, error = %err, "shared cache read failed, recomputing");
            }
        }

        bump(&self.counters.misses);
        debug!(keyword, generation, "render cache miss");
        None
    }

    /// Stores a description rendered against `generation`. Renders computed
    /// from a superseded snapshot are dropped.
    pub fn put(&self, keyword: &str, generation: u64, html: &str) {
        if generation != self.generation() {
            debug!(keyword, generation, "dropping render from stale generation");
            return;
        }
        self.store_tier1(keyword, generation, html.to_string());

        let key = self.shared_key(keyword);
        if let Err(err) = self.tier2.set(&key, html.as_bytes()) {
            bump(&self.counters.tier2_errors);
            warn!(keyword, error = %err, "shared cache write failed");
            return;
        }
        // A flush may have landed between the generation check and the write.
        if generation != self.generation() {
            if let Err(err) = self.tier2.delete(&key) {
                bump(&self.counters.tier2_errors);
                warn!(keyword, error = %err, "failed to retract stale shared cache entry");
            }
        }
    }

    fn store_tier1(&self, keyword: &str, generation: u64, html: String) {
        self.tier1
            .lock()
            .put(keyword.to_string(), RenderCacheEntry { generation, html });
    }

    /// Adopts `generation` as current, drops the cached matcher and flushes
    /// the shared tier.
    pub fn invalidate_all(&self, generation: u64) {
        let previous = self.generation.fetch_max(generation, Ordering::AcqRel);
        self.matcher.store(None);
        if let Err(err) = self.tier2.flush_all() {
            bump(&self.counters.tier2_errors);
            warn!(error = %err, generation, "shared cache flush failed");
        }
        debug!(previous, generation, "render caches invalidated");
    }

    /// Returns the matcher for `snapshot`, compiling it when the cached one
    /// belongs to another generation. Concurrent misses may build twice.
    pub fn matcher_for(
        &self,
        snapshot: &KeywordSnapshot,
    ) -> Result<Arc<CompiledMatcher>, MatcherBuildError> {
        if let Some(matcher) = self.matcher.load_full() {
            if matcher.generation() == snapshot.generation() {
                return Ok(matcher);
            }
        }
        let matcher = Arc::new(CompiledMatcher::build(snapshot)?);
        bump(&self.counters.matcher_builds);
        debug!(
            generation = snapshot.generation(),
            patterns = matcher.pattern_count(),
            "compiled keyword matcher"
        );
        if snapshot.generation() == self.generation() {
            self.matcher.store(Some(Arc::clone(&matcher)));
        }
        Ok(matcher)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            generation: self.generation(),
            tier1_hits: self.counters.tier1_hits.load(Ordering::Relaxed),
            tier2_hits: self.counters.tier2_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            tier2_errors: self.counters.tier2_errors.load(Ordering::Relaxed),
            matcher_builds: self.counters.matcher_builds.load(Ordering::Relaxed),
        }
    }
}

impl CorpusListener for CacheLayer {
    fn corpus_changed(&self, generation: u64) {
        self.invalidate_all(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::KeywordIndex;

    struct DownStore;

    impl SharedCacheStore for DownStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        fn set(&self, _key: &str, _value: &[u8]) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        fn flush_all(&self) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }
    }

    fn layer(store: Arc<dyn SharedCacheStore>) -> CacheLayer {
        CacheLayer::new(&EngineConfig::default(), store)
    }

    #[test]
    fn put_then_get_hits_tier1() {
        let store = Arc::new(MemoryStore::new());
        let cache = layer(store.clone());
        assert_eq!(cache.get("k", 0), None);
        cache.put("k", 0, "<p>k</p>");
        assert_eq!(cache.get("k", 0).as_deref(), Some("<p>k</p>"));
        assert_eq!(store.len(), 1);
        let stats = cache.stats();
        assert_eq!((stats.tier1_hits, stats.misses), (1, 1));
    }

    #[test]
    fn tier2_hit_populates_tier1() {
        let store = Arc::new(MemoryStore::new());
        store.set("htmlify:k", b"shared").unwrap();
        let cache = layer(store.clone());
        assert_eq!(cache.get("k", 0).as_deref(), Some("shared"));
        store.flush_all().unwrap();
        assert_eq!(cache.get("k", 0).as_deref(), Some("shared"));
        let stats = cache.stats();
        assert_eq!((stats.tier2_hits, stats.tier1_hits), (1, 1));
    }

    #[test]
    fn invalidation_hides_old_entries_and_flushes_tier2() {
        let store = Arc::new(MemoryStore::new());
        let cache = layer(store.clone());
        cache.put("k", 0, "old");
        cache.invalidate_all(1);
        assert!(store.is_empty());
        assert_eq!(cache.get("k", 1), None);
        assert_eq!(cache.get("k", 0), None);
    }

    #[test]
    fn stale_generation_puts_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        let cache = layer(store.clone());
        cache.invalidate_all(2);
        cache.put("k", 1, "stale");
        assert!(store.is_empty());
        assert_eq!(cache.get("k", 2), None);
    }

    #[test]
    fn generation_never_moves_backwards() {
        let cache = layer(Arc::new(MemoryStore::new()));
        cache.invalidate_all(5);
        cache.invalidate_all(3);
        assert_eq!(cache.generation(), 5);
    }

    #[test]
    fn unavailable_tier2_degrades_to_tier1() {
        let cache = layer(Arc::new(DownStore));
        assert_eq!(cache.get("k", 0), None);
        cache.put("k", 0, "html");
        cache.invalidate_all(0);
        assert_eq!(cache.get("k", 0).as_deref(), Some("html"));
        assert_eq!(cache.stats().tier2_errors, 3);
    }

    #[test]
    fn tier1_capacity_evicts_least_recent() {
        let cache = CacheLayer::with_capacity(
            NonZeroUsize::new(1).unwrap(),
            String::new(),
            Arc::new(DownStore),
        );
        cache.put("a", 0, "A");
        cache.put("b", 0, "B");
        assert_eq!(cache.get("a", 0), None);
        assert_eq!(cache.get("b", 0).as_deref(), Some("B"));
    }

    #[test]
    fn matcher_is_reused_until_invalidated() {
        let cache = Arc::new(layer(Arc::new(MemoryStore::new())));
        let index = KeywordIndex::new().with_listener(cache.clone());
        let first = index.upsert("foo", "<a>foo</a>").unwrap();
        let a = cache.matcher_for(&first).unwrap();
        let b = cache.matcher_for(&first).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let second = index.upsert("bar", "<a>bar</a>").unwrap();
        let c = cache.matcher_for(&second).unwrap();
        assert_eq!(c.generation(), 2);
        assert_eq!(c.pattern_count(), 2);
        assert_eq!(cache.stats().matcher_builds, 2);
    }

    #[test]
    fn matcher_for_old_snapshot_is_not_cached() {
        let cache = Arc::new(layer(Arc::new(MemoryStore::new())));
        let index = KeywordIndex::new().with_listener(cache.clone());
        let old = index.upsert("foo", "<a>foo</a>").unwrap();
        index.upsert("bar", "<a>bar</a>").unwrap();
        cache.matcher_for(&old).unwrap();
        cache.matcher_for(&old).unwrap();
        assert_eq!(cache.stats().matcher_builds, 2);
    }
}
