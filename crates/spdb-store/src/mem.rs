//! In-memory [`Backend`].
//!
//! Stores live in a `DashMap` keyed by directory, each one a `BTreeMap` from
//! valid time to the chunks stored at that time in insertion order. Handles
//! to the same directory share one store.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use spdb_types::{ChunkBatch, ProductInfo};

use crate::backend::{Backend, StoreHandle};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct StoredChunk {
    data_type: i32,
    data_type2: i32,
    expire_time: i64,
    data: Vec<u8>,
}

impl StoredChunk {
    /// Per-key match where 0 selects every value.
    fn matches(&self, data_type: i32, data_type2: i32) -> bool {
        (data_type == 0 || self.data_type == data_type)
            && (data_type2 == 0 || self.data_type2 == data_type2)
    }

    fn has_key(&self, data_type: i32, data_type2: i32) -> bool {
        self.data_type == data_type && self.data_type2 == data_type2
    }
}

#[derive(Debug, Default)]
struct ProductStore {
    product: ProductInfo,
    chunks: BTreeMap<i64, Vec<StoredChunk>>,
}

impl ProductStore {
    fn has_match(&self, time: i64, data_type: i32, data_type2: i32) -> bool {
        self.chunks
            .get(&time)
            .is_some_and(|v| v.iter().any(|c| c.matches(data_type, data_type2)))
    }

    /// Matching chunks at the given times, in time order.
    fn collect<I>(&self, times: I, data_type: i32, data_type2: i32) -> StoreResult<ChunkBatch>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut batch = ChunkBatch::new();
        for t in times {
            if let Some(chunks) = self.chunks.get(&t) {
                for c in chunks.iter().filter(|c| c.matches(data_type, data_type2)) {
                    add_stored(&mut batch, t, c)?;
                }
            }
        }
        Ok(batch)
    }

    /// Latest time strictly before `time` and not before `floor` holding a
    /// matching chunk.
    fn nearest_before(
        &self,
        time: i64,
        floor: Bound<i64>,
        data_type: i32,
        data_type2: i32,
    ) -> Option<i64> {
        self.chunks
            .range((floor, Bound::Excluded(time)))
            .rev()
            .find(|(_, v)| v.iter().any(|c| c.matches(data_type, data_type2)))
            .map(|(t, _)| *t)
    }

    fn nearest_after(
        &self,
        time: i64,
        ceiling: Bound<i64>,
        data_type: i32,
        data_type2: i32,
    ) -> Option<i64> {
        self.chunks
            .range((Bound::Excluded(time), ceiling))
            .find(|(_, v)| v.iter().any(|c| c.matches(data_type, data_type2)))
            .map(|(t, _)| *t)
    }
}

fn add_stored(batch: &mut ChunkBatch, valid_time: i64, c: &StoredChunk) -> StoreResult<()> {
    batch.add_chunk_with_type2(c.data_type, c.data_type2, valid_time, c.expire_time, &c.data)?;
    Ok(())
}

fn lower_bound(time: i64, margin: i64) -> Bound<i64> {
    if margin < 0 {
        Bound::Unbounded
    } else {
        Bound::Included(time.saturating_sub(margin))
    }
}

fn upper_bound(time: i64, margin: i64) -> Bound<i64> {
    if margin < 0 {
        Bound::Unbounded
    } else {
        Bound::Included(time.saturating_add(margin))
    }
}

/// Reject bounds that `BTreeMap::range` would panic on.
fn checked_range(lo: Bound<i64>, hi: Bound<i64>) -> bool {
    match (lo, hi) {
        (Bound::Included(a), Bound::Included(b)) => a <= b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b)) => a < b,
        (Bound::Excluded(a), Bound::Excluded(b)) => a < b,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// MemBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemBackend {
    stores: DashMap<PathBuf, Arc<RwLock<ProductStore>>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of directories opened so far.
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }
}

impl Backend for MemBackend {
    fn open(
        &self,
        prod_label: &str,
        prod_id: i32,
        dir: &Path,
    ) -> StoreResult<Box<dyn StoreHandle>> {
        if dir.as_os_str().is_empty() {
            return Err(StoreError::Open {
                dir: dir.to_path_buf(),
                reason: "empty directory path".to_string(),
            });
        }

        let store = self
            .stores
            .entry(dir.to_path_buf())
            .or_insert_with(|| {
                tracing::debug!(dir = %dir.display(), "creating store");
                Arc::new(RwLock::new(ProductStore::default()))
            })
            .clone();

        {
            let mut guard = store.write();
            if guard.product.prod_label.is_empty() && !prod_label.is_empty() {
                guard.product = ProductInfo::new(prod_id, prod_label);
            }
        }

        Ok(Box::new(MemHandle {
            dir: dir.to_path_buf(),
            store,
        }))
    }
}

pub struct MemHandle {
    dir: PathBuf,
    store: Arc<RwLock<ProductStore>>,
}

impl MemHandle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn insert(&mut self, chunk: StoredChunk, valid_time: i64, replace: bool) {
        let mut store = self.store.write();
        let slot = store.chunks.entry(valid_time).or_default();
        if replace {
            slot.retain(|c| !c.has_key(chunk.data_type, chunk.data_type2));
        }
        slot.push(chunk);
    }
}

fn stored(data_type: i32, data_type2: i32, expire_time: i64, data: &[u8]) -> StoredChunk {
    StoredChunk {
        data_type,
        data_type2,
        expire_time,
        data: data.to_vec(),
    }
}

impl StoreHandle for MemHandle {
    fn product(&self) -> ProductInfo {
        self.store.read().product.clone()
    }

    fn store_over(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> StoreResult<()> {
        self.insert(stored(data_type, data_type2, expire_time, data), valid_time, true);
        Ok(())
    }

    fn store_add(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> StoreResult<()> {
        self.insert(stored(data_type, data_type2, expire_time, data), valid_time, false);
        Ok(())
    }

    fn store(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> StoreResult<bool> {
        let mut store = self.store.write();
        let slot = store.chunks.entry(valid_time).or_default();
        if slot.iter().any(|c| c.has_key(data_type, data_type2)) {
            return Ok(false);
        }
        slot.push(stored(data_type, data_type2, expire_time, data));
        Ok(true)
    }

    fn store_add_unique(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> StoreResult<bool> {
        let mut store = self.store.write();
        let slot = store.chunks.entry(valid_time).or_default();
        let duplicate = slot.iter().any(|c| {
            c.has_key(data_type, data_type2) && c.expire_time == expire_time && c.data == data
        });
        if duplicate {
            return Ok(false);
        }
        slot.push(stored(data_type, data_type2, expire_time, data));
        Ok(true)
    }

    fn fetch_exact(&self, time: i64, data_type: i32, data_type2: i32) -> StoreResult<ChunkBatch> {
        self.store.read().collect([time], data_type, data_type2)
    }

    fn fetch_closest(
        &self,
        time: i64,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> StoreResult<ChunkBatch> {
        let store = self.store.read();
        if store.has_match(time, data_type, data_type2) {
            return store.collect([time], data_type, data_type2);
        }

        let before = store.nearest_before(time, lower_bound(time, margin), data_type, data_type2);
        let after = store.nearest_after(time, upper_bound(time, margin), data_type, data_type2);
        let best = match (before, after) {
            (Some(b), Some(a)) => {
                if time.abs_diff(b) <= a.abs_diff(time) {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (b, a) => b.or(a),
        };
        store.collect(best, data_type, data_type2)
    }

    fn fetch_interval(
        &self,
        start: i64,
        end: i64,
        data_type: i32,
        data_type2: i32,
    ) -> StoreResult<ChunkBatch> {
        if start > end {
            return Ok(ChunkBatch::new());
        }
        let store = self.store.read();
        let times: Vec<i64> = store.chunks.range(start..=end).map(|(t, _)| *t).collect();
        store.collect(times, data_type, data_type2)
    }

    fn fetch_valid(&self, time: i64, data_type: i32, data_type2: i32) -> StoreResult<ChunkBatch> {
        let store = self.store.read();
        let mut batch = ChunkBatch::new();
        for (&t, chunks) in store.chunks.range(..=time) {
            for c in chunks
                .iter()
                .filter(|c| c.matches(data_type, data_type2) && time < c.expire_time)
            {
                add_stored(&mut batch, t, c)?;
            }
        }
        Ok(batch)
    }

    fn fetch_first_before(
        &self,
        time: i64,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> StoreResult<ChunkBatch> {
        let store = self.store.read();
        if store.has_match(time, data_type, data_type2) {
            return store.collect([time], data_type, data_type2);
        }
        let floor = Bound::Included(time.saturating_sub(margin));
        if !checked_range(floor, Bound::Excluded(time)) {
            return Ok(ChunkBatch::new());
        }
        let found = store.nearest_before(time, floor, data_type, data_type2);
        store.collect(found, data_type, data_type2)
    }

    fn fetch_first_after(
        &self,
        time: i64,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> StoreResult<ChunkBatch> {
        let store = self.store.read();
        if store.has_match(time, data_type, data_type2) {
            return store.collect([time], data_type, data_type2);
        }
        let ceiling = Bound::Included(time.saturating_add(margin));
        if !checked_range(Bound::Excluded(time), ceiling) {
            return Ok(ChunkBatch::new());
        }
        let found = store.nearest_after(time, ceiling, data_type, data_type2);
        store.collect(found, data_type, data_type2)
    }

    fn last_valid_time(&self, data_type: i32, data_type2: i32) -> StoreResult<i64> {
        let store = self.store.read();
        Ok(store
            .chunks
            .iter()
            .rev()
            .find(|(_, v)| v.iter().any(|c| c.matches(data_type, data_type2)))
            .map(|(t, _)| *t)
            .unwrap_or(0))
    }

    fn first_and_last_times(&self) -> StoreResult<(i64, i64)> {
        let store = self.store.read();
        let first = store.chunks.keys().next().copied().unwrap_or(0);
        let last = store.chunks.keys().next_back().copied().unwrap_or(0);
        Ok((first, last))
    }

    fn erase(&mut self, valid_time: i64, data_type: i32, data_type2: i32) -> StoreResult<usize> {
        let mut store = self.store.write();
        let Some(slot) = store.chunks.get_mut(&valid_time) else {
            return Ok(0);
        };
        let before = slot.len();
        slot.retain(|c| !c.matches(data_type, data_type2));
        let removed = before - slot.len();
        if slot.is_empty() {
            store.chunks.remove(&valid_time);
        }
        Ok(removed)
    }

    fn time_list(&self, start: i64, end: i64, min_interval: i64) -> StoreResult<Vec<i64>> {
        if start > end {
            return Ok(Vec::new());
        }
        let store = self.store.read();
        let mut times = Vec::new();
        let mut last_kept: Option<i64> = None;
        for (&t, chunks) in store.chunks.range(start..=end) {
            for _ in chunks {
                if last_kept.map_or(true, |prev| t.saturating_sub(prev) >= min_interval) {
                    times.push(t);
                    last_kept = Some(t);
                }
            }
        }
        Ok(times)
    }
}
