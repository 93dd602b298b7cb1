use std::path::Path;

use spdb_types::{ChunkBatch, ProductInfo};

use crate::error::StoreResult;

/// A local storage engine. Opening the same directory twice yields handles
/// over the same data.
pub trait Backend: Send + Sync + 'static {
    fn open(&self, prod_label: &str, prod_id: i32, dir: &Path)
        -> StoreResult<Box<dyn StoreHandle>>;
}

/// An open store directory.
///
/// Chunks are keyed by `(valid_time, data_type, data_type2)`. Every fetch
/// takes both type filters, where 0 matches all values of that key. A fetch
/// that finds nothing returns an empty batch, not an error. Fetched batches
/// are in ascending valid-time order.
pub trait StoreHandle: Send {
    fn product(&self) -> ProductInfo;

    /// Replace chunks with the same key.
    fn store_over(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> StoreResult<()>;

    /// Add alongside any existing chunks.
    fn store_add(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> StoreResult<()>;

    /// Store only if nothing exists at the same key. Returns whether the
    /// chunk was written.
    fn store(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> StoreResult<bool>;

    /// Add unless a chunk with the same key, expire time and payload is
    /// already stored. Returns whether the chunk was written.
    fn store_add_unique(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> StoreResult<bool>;

    fn fetch_exact(&self, time: i64, data_type: i32, data_type2: i32) -> StoreResult<ChunkBatch>;

    /// Nearest valid time within `margin` seconds; negative `margin` is
    /// unbounded. Ties go to the earlier time.
    fn fetch_closest(
        &self,
        time: i64,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> StoreResult<ChunkBatch>;

    /// Inclusive on both ends.
    fn fetch_interval(
        &self,
        start: i64,
        end: i64,
        data_type: i32,
        data_type2: i32,
    ) -> StoreResult<ChunkBatch>;

    /// Chunks with `valid_time <= time < expire_time`.
    fn fetch_valid(&self, time: i64, data_type: i32, data_type2: i32) -> StoreResult<ChunkBatch>;

    fn fetch_first_before(
        &self,
        time: i64,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> StoreResult<ChunkBatch>;

    fn fetch_first_after(
        &self,
        time: i64,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> StoreResult<ChunkBatch>;

    /// Latest valid time holding a matching chunk, or 0 when there is none.
    fn last_valid_time(&self, data_type: i32, data_type2: i32) -> StoreResult<i64>;

    /// `(first, last)` valid times, `(0, 0)` when empty.
    fn first_and_last_times(&self) -> StoreResult<(i64, i64)>;

    /// Remove matching chunks at `valid_time`. Returns how many went.
    fn erase(&mut self, valid_time: i64, data_type: i32, data_type2: i32) -> StoreResult<usize>;

    /// One entry per chunk in `[start, end]`, skipping entries closer than
    /// `min_interval` to the previously kept one.
    fn time_list(&self, start: i64, end: i64, min_interval: i64) -> StoreResult<Vec<i64>>;

    /// Release the handle. Dropping it has the same effect.
    fn close(self: Box<Self>) {}
}
