//! Per-project memoization of [`Aggregation`]s.
//!
//! An entry is tagged with the project's latest build number at fill time and
//! is served only while that build is still the latest. Entries are advisory:
//! they may be released at any time (memory pressure, LRU eviction) and are
//! rebuilt from the report files on the next request.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ahash::AHashMap;
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
    BenchTrendError,
    aggregate::{Aggregation, ReportAggregator},
    config::CacheConfig,
    history::BuildHistory,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Default)]
struct ProjectSlot {
    current: ArcSwapOption<Aggregation>,
    fill: Mutex<()>,
    last_used: AtomicU64,
}

impl ProjectSlot {
    /// The cached aggregation, if it was computed for `latest`.
    fn fresh(&self, latest: Option<u32>) -> Option<Arc<Aggregation>> {
        let cached = self.current.load_full()?;
        match (cached.latest_build(), latest) {
            (Some(tag), Some(latest)) if tag.0 == latest => Some(cached),
            _ => None,
        }
    }
}

pub struct AggregationCache {
    aggregator: ReportAggregator,
    slots: RwLock<AHashMap<String, Arc<ProjectSlot>>>,
    max_projects: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for AggregationCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl AggregationCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            aggregator: ReportAggregator::new(),
            slots: RwLock::new(AHashMap::new()),
            max_projects: config.max_projects.max(1),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Aggregation for `project`, recomputed only when a newer build exists
    /// or the cached value was released.
    ///
    /// Readers of a fresh value do not block each other; a refill holds the
    /// project's fill lock so concurrent callers wait for a single pass.
    pub fn get(&self, project: &dyn BuildHistory) -> Result<Arc<Aggregation>, BenchTrendError> {
        let latest = project.latest_build()?.map(|b| b.0);
        let slot = self.slot(&project.cache_key());
        slot.last_used
            .store(self.clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);

        if let Some(cached) = slot.fresh(latest) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }

        let _fill = slot.fill.lock();
        if let Some(cached) = slot.fresh(latest) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            project = project.project_name(),
            latest = ?latest,
            "aggregation cache miss"
        );
        let aggregation = Arc::new(self.aggregator.aggregate(project)?);
        slot.current.store(Some(Arc::clone(&aggregation)));
        Ok(aggregation)
    }

    /// Drops the cached aggregation of one project.
    pub fn release(&self, project: &dyn BuildHistory) {
        if let Some(slot) = self.slots.read().get(&project.cache_key()) {
            slot.current.store(None);
        }
    }

    /// Drops every cached aggregation, as under memory pressure.
    pub fn release_all(&self) {
        for slot in self.slots.read().values() {
            slot.current.store(None);
        }
    }

    pub fn clear(&self) {
        self.slots.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn aggregator(&self) -> &ReportAggregator {
        &self.aggregator
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .slots
            .read()
            .values()
            .filter(|slot| slot.current.load().is_some())
            .count();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
        }
    }

    fn slot(&self, key: &str) -> Arc<ProjectSlot> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }
        while slots.len() >= self.max_projects {
            // A slot whose fill lock is held is mid-aggregation and stays.
            let oldest = slots
                .iter()
                .filter(|(_, slot)| !slot.fill.is_locked())
                .min_by_key(|(_, slot)| slot.last_used.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());
            let Some(oldest) = oldest else {
                break;
            };
            slots.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(project = oldest.as_str(), "evicted cached aggregation");
        }
        let slot = Arc::new(ProjectSlot::default());
        slots.insert(key.to_string(), Arc::clone(&slot));
        slot
    }
}
