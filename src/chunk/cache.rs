use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::CacheError;

/// Cache key: document identity plus the identity of the feature set the
/// payload was extracted for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub document: Box<str>,
    pub feature_set: Box<str>,
}

/// One cached extraction: the chunk size actually used and the events
/// extracted per chunk. Entries are replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub chunk_size: usize,
    pub chunks: Vec<Vec<Box<str>>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedCache {
    max_differential: f64,
    entries: Vec<(CacheKey, CacheEntry)>,
}

/// Concurrent cache of chunked extraction results.
///
/// A lookup hits while `|cached − requested| / requested` stays within the
/// configured differential; a stale entry triggers recomputation and an
/// atomic overwrite, never an error. Entries for distinct documents are
/// independent; requests for the same key serialize on a per-key latch so
/// at most one recompute runs per key.
#[derive(Debug)]
pub struct ChunkCache {
    enabled: bool,
    max_differential: f64,
    entries: DashMap<CacheKey, Arc<CacheEntry>, RandomState>,
    latches: DashMap<CacheKey, Arc<Mutex<()>>, RandomState>,
}

impl ChunkCache {
    pub fn new(enabled: bool, max_differential: f64) -> Self {
        Self {
            enabled,
            max_differential,
            entries: DashMap::with_hasher(RandomState::new()),
            latches: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.cache_enabled, config.chunk_max_differential)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch the chunked extraction for a document, recomputing via
    /// `compute` on a miss or a stale entry.
    pub fn get_chunks<F, E>(
        &self,
        document: &str,
        feature_set: &str,
        target_size: usize,
        compute: F,
    ) -> Result<Arc<CacheEntry>, E>
    where
        F: FnOnce() -> Result<Vec<Vec<Box<str>>>, E>,
    {
        if !self.enabled {
            return Ok(Arc::new(CacheEntry {
                chunk_size: target_size,
                chunks: compute()?,
            }));
        }
        let key = CacheKey {
            document: document.into(),
            feature_set: feature_set.into(),
        };
        if let Some(hit) = self.lookup(&key, target_size) {
            return Ok(hit);
        }
        // Single flight: whoever wins the latch computes; losers re-check
        // and reuse the fresh entry. The latch lives only for the compute.
        let latch = self
            .latches
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock_latch(&latch);
        if let Some(hit) = self.lookup(&key, target_size) {
            self.drop_latch(&key, &latch);
            return Ok(hit);
        }
        debug!(document, target_size, "chunk cache miss, extracting");
        let chunks = match compute() {
            Ok(chunks) => chunks,
            Err(err) => {
                self.drop_latch(&key, &latch);
                return Err(err);
            }
        };
        let entry = Arc::new(CacheEntry {
            chunk_size: target_size,
            chunks,
        });
        self.entries.insert(key.clone(), entry.clone());
        self.drop_latch(&key, &latch);
        Ok(entry)
    }

    // Remove the latch only if it is still the one we held; a concurrent
    // miss may already have installed a fresh latch for the same key.
    fn drop_latch(&self, key: &CacheKey, latch: &Arc<Mutex<()>>) {
        self.latches
            .remove_if(key, |_, existing| Arc::ptr_eq(existing, latch));
    }

    fn lookup(&self, key: &CacheKey, target_size: usize) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.get(key)?;
        if size_within_tolerance(entry.chunk_size, target_size, self.max_differential) {
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Administrative bulk invalidation: drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
        self.latches.clear();
    }

    /// Persist every entry to `path` as CBOR, keys sorted so the file
    /// contents are deterministic.
    pub fn save_to(&self, path: &Path) -> Result<(), CacheError> {
        let mut entries: Vec<(CacheKey, CacheEntry)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), (**entry.value()).clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let file = File::create(path)?;
        serde_cbor::to_writer(
            file,
            &PersistedCache {
                max_differential: self.max_differential,
                entries,
            },
        )?;
        Ok(())
    }

    /// Load a cache persisted by [`ChunkCache::save_to`].
    pub fn load_from(path: &Path, enabled: bool) -> Result<Self, CacheError> {
        let file = File::open(path)?;
        let persisted: PersistedCache = serde_cbor::from_reader(file)?;
        let cache = Self::new(enabled, persisted.max_differential);
        for (key, entry) in persisted.entries {
            cache.entries.insert(key, Arc::new(entry));
        }
        Ok(cache)
    }
}

fn lock_latch(latch: &Mutex<()>) -> MutexGuard<'_, ()> {
    // a poisoned latch only means another request panicked mid-compute
    latch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn size_within_tolerance(cached: usize, requested: usize, max_differential: f64) -> bool {
    if cached == requested {
        return true;
    }
    if requested == 0 {
        return false;
    }
    let differential = (cached as f64 - requested as f64).abs() / requested as f64;
    differential <= max_differential
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::ExtractionError;

    fn payload(events: &[&str]) -> Vec<Vec<Box<str>>> {
        vec![events.iter().map(|event| Box::from(*event)).collect()]
    }

    fn fill(cache: &ChunkCache, document: &str, size: usize, counter: &AtomicUsize) -> Arc<CacheEntry> {
        cache
            .get_chunks(document, "words", size, || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ExtractionError>(payload(&["the", "of"]))
            })
            .expect("get_chunks")
    }

    #[test]
    fn close_enough_sizes_hit() {
        let cache = ChunkCache::new(true, 0.05);
        let computed = AtomicUsize::new(0);
        fill(&cache, "letters", 500, &computed);
        // 510 is within 5% of 500's entry: served from cache
        let entry = fill(&cache, "letters", 510, &computed);
        assert_eq!(computed.load(Ordering::SeqCst), 1);
        assert_eq!(entry.chunk_size, 500);
    }

    #[test]
    fn stale_entries_are_recomputed_and_overwritten() {
        let cache = ChunkCache::new(true, 0.05);
        let computed = AtomicUsize::new(0);
        fill(&cache, "letters", 500, &computed);
        let entry = fill(&cache, "letters", 600, &computed);
        assert_eq!(computed.load(Ordering::SeqCst), 2);
        assert_eq!(entry.chunk_size, 600);
        assert_eq!(cache.len(), 1);
        // the overwritten entry now serves requests near the new size
        fill(&cache, "letters", 598, &computed);
        assert_eq!(computed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn distinct_documents_are_independent() {
        let cache = ChunkCache::new(true, 0.05);
        let computed = AtomicUsize::new(0);
        fill(&cache, "letters", 500, &computed);
        fill(&cache, "diary", 500, &computed);
        assert_eq!(computed.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn disabled_cache_always_recomputes() {
        let cache = ChunkCache::new(false, 0.05);
        let computed = AtomicUsize::new(0);
        fill(&cache, "letters", 500, &computed);
        fill(&cache, "letters", 500, &computed);
        assert_eq!(computed.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_invalidates_everything() {
        let cache = ChunkCache::new(true, 0.05);
        let computed = AtomicUsize::new(0);
        fill(&cache, "letters", 500, &computed);
        cache.clear();
        assert!(cache.is_empty());
        fill(&cache, "letters", 500, &computed);
        assert_eq!(computed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn compute_errors_propagate_and_store_nothing() {
        let cache = ChunkCache::new(true, 0.05);
        let result = cache.get_chunks("letters", "words", 500, || {
            Err::<Vec<Vec<Box<str>>>, _>(ExtractionError::new("tagger unavailable"))
        });
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(cache.latches.is_empty());
    }

    #[test]
    fn latches_do_not_outlive_their_compute() {
        let cache = ChunkCache::new(true, 0.05);
        let computed = AtomicUsize::new(0);
        fill(&cache, "letters", 500, &computed);
        fill(&cache, "diary", 500, &computed);
        // recompute a stale entry for good measure
        fill(&cache, "letters", 600, &computed);
        assert_eq!(cache.len(), 2);
        assert!(cache.latches.is_empty());
    }

    #[test]
    fn same_key_requests_compute_once() {
        let cache = Arc::new(ChunkCache::new(true, 0.05));
        let computed = Arc::new(AtomicUsize::new(0));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = Arc::clone(&cache);
                let computed = Arc::clone(&computed);
                scope.spawn(move || {
                    cache
                        .get_chunks("letters", "words", 500, || {
                            computed.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok::<_, ExtractionError>(payload(&["the"]))
                        })
                        .expect("get_chunks");
                });
            }
        });
        assert_eq!(computed.load(Ordering::SeqCst), 1);
        assert!(cache.latches.is_empty());
    }

    #[test]
    fn persistence_round_trips() {
        let cache = ChunkCache::new(true, 0.05);
        let computed = AtomicUsize::new(0);
        let original = fill(&cache, "letters", 500, &computed);

        let file = tempfile::NamedTempFile::new().expect("temp file");
        cache.save_to(file.path()).expect("save");

        let restored = ChunkCache::load_from(file.path(), true).expect("load");
        assert_eq!(restored.len(), 1);
        let entry = fill(&restored, "letters", 500, &computed);
        assert_eq!(*entry, *original);
        // served from the restored entries, not recomputed
        assert_eq!(computed.load(Ordering::SeqCst), 1);
    }
}
