//! JSON snapshots so a cache survives between CLI runs.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::{CacheEntry, CacheState, Fingerprint, ResultCache};
use crate::record::FieldMap;

/// Current schema version for cache snapshot files.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub schema_version: u32,
    /// Oldest first, so replaying inserts restores recency order.
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub fingerprint: Fingerprint,
    pub schema_id: String,
    pub fields: FieldMap,
    pub created_at_ms: u64,
    pub last_access_ms: u64,
}

impl ResultCache {
    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.state();
        let entries = state
            .recency
            .values()
            .filter_map(|fingerprint| {
                let entry = state.entries.get(fingerprint)?;
                Some(SnapshotEntry {
                    fingerprint: fingerprint.clone(),
                    schema_id: entry.schema_id.clone(),
                    fields: entry.fields.clone(),
                    created_at_ms: entry.created_at_ms,
                    last_access_ms: entry.last_access_ms,
                })
            })
            .collect();
        CacheSnapshot {
            schema_version: CACHE_SCHEMA_VERSION,
            entries,
        }
    }

    /// Rebuild a cache, keeping only the most recent `max_entries` entries.
    pub fn from_snapshot(snapshot: CacheSnapshot, max_entries: usize) -> Self {
        let cache = Self::new(max_entries);
        {
            let mut state = cache.state();
            for entry in snapshot.entries {
                insert_restored(&mut state, entry);
            }
            state.shrink_to(cache.max_entries);
            state.stats = Default::default();
        }
        cache
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create cache dir")?;
        }
        let text = serde_json::to_string_pretty(&self.snapshot())
            .context("serialize cache snapshot")?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("cache");
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
        fs::write(&tmp_path, text.as_bytes())
            .with_context(|| format!("write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| format!("publish {}", path.display()))?;
        Ok(())
    }

    /// Load a snapshot; a missing file yields an empty cache.
    pub fn load(path: &Path, max_entries: usize) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(max_entries));
        }
        let bytes = fs::read(path).with_context(|| format!("read cache {}", path.display()))?;
        let snapshot: CacheSnapshot =
            serde_json::from_slice(&bytes).context("parse cache snapshot JSON")?;
        if snapshot.schema_version != CACHE_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported cache schema_version {} (expected {})",
                snapshot.schema_version,
                CACHE_SCHEMA_VERSION
            ));
        }
        let count = snapshot.entries.len();
        let cache = Self::from_snapshot(snapshot, max_entries);
        tracing::debug!(path = %path.display(), loaded = count, kept = cache.len(), "cache loaded");
        Ok(cache)
    }
}

fn insert_restored(state: &mut CacheState, entry: SnapshotEntry) {
    let tick = state.next_tick();
    if let Some(previous) = state.entries.get(&entry.fingerprint) {
        let old_tick = previous.tick;
        state.recency.remove(&old_tick);
    }
    state.recency.insert(tick, entry.fingerprint.clone());
    state.entries.insert(
        entry.fingerprint,
        CacheEntry {
            schema_id: entry.schema_id,
            fields: entry.fields,
            created_at_ms: entry.created_at_ms,
            last_access_ms: entry.last_access_ms,
            tick,
        },
    );
}
