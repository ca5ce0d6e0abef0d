//! Result cache keyed by normalized input fingerprints.
//!
//! Only successful outputs are cached. A single mutex guards the entries and
//! the recency index together, so concurrent inserts of the same fingerprint
//! cannot corrupt LRU bookkeeping and a lookup always clones a whole entry
//! before eviction can touch it.
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

mod fingerprint;
mod snapshot;

pub use fingerprint::Fingerprint;
pub use snapshot::{CacheSnapshot, SnapshotEntry, CACHE_SCHEMA_VERSION};

use crate::record::{FieldMap, Outcome};
use crate::schema::Schema;
use crate::util::now_epoch_ms;

/// Default bound on cached entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// What to remove in an explicit [`ResultCache::evict`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Drop least-recently-used entries until at most `max_entries` remain.
    LeastRecentlyUsed { max_entries: usize },
    /// Drop entries not read or written for longer than the given duration.
    IdleLongerThan(Duration),
    /// Drop every entry of one schema (after its columns or templates change).
    Schema(String),
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    schema_id: String,
    fields: FieldMap,
    created_at_ms: u64,
    last_access_ms: u64,
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    /// Recency tick to fingerprint; the first key is the least recent.
    recency: BTreeMap<u64, Fingerprint>,
    clock: u64,
    stats: CacheStats,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> bool {
        match self.entries.remove(fingerprint) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                self.stats.evictions += 1;
                true
            }
            None => false,
        }
    }

    fn shrink_to(&mut self, max_entries: usize) -> usize {
        let mut removed = 0;
        while self.entries.len() > max_entries {
            let Some((_, fingerprint)) = self.recency.pop_first() else {
                break;
            };
            if self.entries.remove(&fingerprint).is_some() {
                self.stats.evictions += 1;
                removed += 1;
            }
        }
        removed
    }
}

/// Process-wide store of successful outputs, shared across dispatch workers.
#[derive(Debug)]
pub struct ResultCache {
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl ResultCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Cached output for these inputs, refreshing its recency on a hit.
    pub fn lookup(&self, schema: &Schema, inputs: &FieldMap) -> Option<FieldMap> {
        let fingerprint = Fingerprint::compute(schema, inputs);
        self.lookup_fingerprint(&fingerprint)
    }

    pub fn lookup_fingerprint(&self, fingerprint: &Fingerprint) -> Option<FieldMap> {
        let mut state = self.state();
        let tick = state.next_tick();
        let Some(entry) = state.entries.get_mut(fingerprint) else {
            state.stats.misses += 1;
            return None;
        };
        let previous = entry.tick;
        entry.tick = tick;
        entry.last_access_ms = now_epoch_ms();
        let fields = entry.fields.clone();
        state.recency.remove(&previous);
        state.recency.insert(tick, fingerprint.clone());
        state.stats.hits += 1;
        Some(fields)
    }

    /// Store a successful outcome; anything else is ignored.
    ///
    /// Returns whether the outcome was cached.
    pub fn insert(&self, schema: &Schema, inputs: &FieldMap, outcome: &Outcome) -> bool {
        let Outcome::Success { fields } = outcome else {
            return false;
        };
        let fingerprint = Fingerprint::compute(schema, inputs);
        let now = now_epoch_ms();
        let mut state = self.state();
        let tick = state.next_tick();
        let created_at_ms = match state.entries.get(&fingerprint) {
            Some(existing) => {
                let (old_tick, created) = (existing.tick, existing.created_at_ms);
                state.recency.remove(&old_tick);
                created
            }
            None => now,
        };
        state.entries.insert(
            fingerprint.clone(),
            CacheEntry {
                schema_id: schema.id.clone(),
                fields: fields.clone(),
                created_at_ms,
                last_access_ms: now,
                tick,
            },
        );
        state.recency.insert(tick, fingerprint);
        state.stats.inserts += 1;
        let removed = state.shrink_to(self.max_entries);
        if removed > 0 {
            tracing::debug!(removed, max_entries = self.max_entries, "cache evicted lru entries");
        }
        true
    }

    /// Apply an eviction policy; returns how many entries were removed.
    pub fn evict(&self, policy: &EvictionPolicy) -> usize {
        let mut state = self.state();
        match policy {
            EvictionPolicy::LeastRecentlyUsed { max_entries } => state.shrink_to(*max_entries),
            EvictionPolicy::IdleLongerThan(idle) => {
                let cutoff = now_epoch_ms().saturating_sub(idle.as_millis() as u64);
                let stale: Vec<Fingerprint> = state
                    .entries
                    .iter()
                    .filter(|(_, entry)| entry.last_access_ms < cutoff)
                    .map(|(fingerprint, _)| fingerprint.clone())
                    .collect();
                stale.iter().filter(|fp| state.remove(fp)).count()
            }
            EvictionPolicy::Schema(schema_id) => {
                let matching: Vec<Fingerprint> = state
                    .entries
                    .iter()
                    .filter(|(_, entry)| &entry.schema_id == schema_id)
                    .map(|(fingerprint, _)| fingerprint.clone())
                    .collect();
                matching.iter().filter(|fp| state.remove(fp)).count()
            }
            EvictionPolicy::All => {
                let removed = state.entries.len();
                state.entries.clear();
                state.recency.clear();
                state.stats.evictions += removed as u64;
                removed
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::example_schema;
    use serde_json::json;
    use std::sync::Arc;

    fn inputs(name: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("company_name".to_string(), json!(name));
        fields
    }

    fn success(industry: &str) -> Outcome {
        let mut fields = FieldMap::new();
        fields.insert("industry".to_string(), json!(industry));
        Outcome::Success { fields }
    }

    #[test]
    fn second_lookup_hits_with_identical_output() {
        let cache = ResultCache::new(10);
        let schema = example_schema();
        assert!(cache.lookup(&schema, &inputs("Acme")).is_none());
        assert!(cache.insert(&schema, &inputs("Acme"), &success("Tools")));
        let hit = cache.lookup(&schema, &inputs("  ACME ")).expect("hit");
        assert_eq!(hit.get("industry"), Some(&json!("Tools")));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn failures_are_never_cached() {
        let cache = ResultCache::new(10);
        let schema = example_schema();
        let failures = [
            Outcome::ValidationError {
                reason: "x".to_string(),
            },
            Outcome::ProviderError {
                reason: "x".to_string(),
                raw_response: None,
            },
            Outcome::ParseError {
                reason: "x".to_string(),
                raw_response: "x".to_string(),
            },
            Outcome::Cancelled,
        ];
        for outcome in &failures {
            assert!(!cache.insert(&schema, &inputs("Acme"), outcome));
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_bound_evicts_least_recent() {
        let cache = ResultCache::new(2);
        let schema = example_schema();
        cache.insert(&schema, &inputs("a"), &success("1"));
        cache.insert(&schema, &inputs("b"), &success("2"));
        // Touch `a` so `b` becomes the least recent.
        assert!(cache.lookup(&schema, &inputs("a")).is_some());
        cache.insert(&schema, &inputs("c"), &success("3"));
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&schema, &inputs("b")).is_none());
        assert!(cache.lookup(&schema, &inputs("a")).is_some());
        assert!(cache.lookup(&schema, &inputs("c")).is_some());
    }

    #[test]
    fn reinserting_a_key_keeps_bookkeeping_consistent() {
        let cache = ResultCache::new(2);
        let schema = example_schema();
        cache.insert(&schema, &inputs("a"), &success("1"));
        cache.insert(&schema, &inputs("a"), &success("1b"));
        cache.insert(&schema, &inputs("b"), &success("2"));
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.lookup(&schema, &inputs("a")).expect("a")["industry"],
            json!("1b")
        );
    }

    #[test]
    fn explicit_eviction_policies() {
        let cache = ResultCache::new(10);
        let schema = example_schema();
        let mut other = example_schema();
        other.id = "other".to_string();
        cache.insert(&schema, &inputs("a"), &success("1"));
        cache.insert(&schema, &inputs("b"), &success("2"));
        cache.insert(&other, &inputs("a"), &success("3"));
        assert_eq!(cache.evict(&EvictionPolicy::Schema("other".to_string())), 1);
        assert_eq!(cache.evict(&EvictionPolicy::LeastRecentlyUsed { max_entries: 1 }), 1);
        assert!(cache.lookup(&schema, &inputs("b")).is_some());
        assert_eq!(cache.evict(&EvictionPolicy::IdleLongerThan(Duration::from_secs(3600))), 0);
        assert_eq!(cache.evict(&EvictionPolicy::All), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_inserts_of_one_key_leave_one_entry() {
        let cache = Arc::new(ResultCache::new(100));
        let schema = Arc::new(example_schema());
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let cache = Arc::clone(&cache);
                let schema = Arc::clone(&schema);
                scope.spawn(move || {
                    for _ in 0..50 {
                        cache.insert(&schema, &inputs("Acme"), &success(&worker.to_string()));
                        let _ = cache.lookup(&schema, &inputs("acme"));
                    }
                });
            }
        });
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(&schema, &inputs("Acme")).is_some());
    }
}
