//! Puts and queries expressed against any [`StoreHandle`]. Shared by the
//! client's local path and by the server.

use spdb_proto::GetQuery;
use spdb_types::{ChunkBatch, ProductInfo, PutMode, TimesInfo, UniqueMode};

use crate::backend::StoreHandle;
use crate::error::StoreResult;

/// Result of a query: a batch for chunk queries, times for `Times`, a list
/// for `TimeList`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutput {
    pub product: ProductInfo,
    pub batch: ChunkBatch,
    pub times: TimesInfo,
    pub time_list: Vec<i64>,
}

/// Write every chunk of `batch` under `mode`. Returns how many chunks were
/// written; `Once` skips keys that already exist and `AddUnique` skips chunks
/// already stored with the same payload.
pub fn run_put(
    handle: &mut dyn StoreHandle,
    mode: PutMode,
    batch: &ChunkBatch,
) -> StoreResult<usize> {
    let mut written = 0;
    for chunk in batch.iter() {
        let (dt, dt2) = (chunk.data_type, chunk.data_type2);
        let (valid, expire) = (chunk.valid_time, chunk.expire_time);
        let stored = match mode {
            PutMode::Overwrite => {
                handle.store_over(dt, dt2, valid, expire, chunk.data).map(|_| true)?
            }
            PutMode::Add => handle.store_add(dt, dt2, valid, expire, chunk.data).map(|_| true)?,
            PutMode::Once => handle.store(dt, dt2, valid, expire, chunk.data)?,
            PutMode::AddUnique => handle.store_add_unique(dt, dt2, valid, expire, chunk.data)?,
        };
        if stored {
            written += 1;
        } else {
            tracing::debug!(
                data_type = dt,
                data_type2 = dt2,
                valid_time = valid,
                "chunk already present, skipped"
            );
        }
    }
    Ok(written)
}

/// Run one query, then apply the unique filter and drop payloads when only
/// refs were asked for.
pub fn run_query(
    handle: &dyn StoreHandle,
    query: &GetQuery,
    unique: UniqueMode,
    refs_only: bool,
) -> StoreResult<QueryOutput> {
    let mut out = QueryOutput {
        product: handle.product(),
        ..QueryOutput::default()
    };

    let batch = match *query {
        GetQuery::Exact { time, data_type, data_type2 } => {
            handle.fetch_exact(time, data_type, data_type2)?
        }
        GetQuery::Closest { time, margin, data_type, data_type2 } => {
            handle.fetch_closest(time, margin, data_type, data_type2)?
        }
        GetQuery::Interval { start, end, data_type, data_type2 } => {
            handle.fetch_interval(start, end, data_type, data_type2)?
        }
        GetQuery::Valid { time, data_type, data_type2 } => {
            handle.fetch_valid(time, data_type, data_type2)?
        }
        GetQuery::Latest { margin, data_type, data_type2 } => {
            let last_valid = handle.last_valid_time(data_type, data_type2)?;
            if last_valid == 0 {
                ChunkBatch::new()
            } else {
                let margin = margin.max(0);
                handle.fetch_interval(
                    last_valid.saturating_sub(margin),
                    last_valid.saturating_add(margin),
                    data_type,
                    data_type2,
                )?
            }
        }
        GetQuery::FirstBefore { time, margin, data_type, data_type2 } => {
            handle.fetch_first_before(time, margin, data_type, data_type2)?
        }
        GetQuery::FirstAfter { time, margin, data_type, data_type2 } => {
            handle.fetch_first_after(time, margin, data_type, data_type2)?
        }
        GetQuery::Times => {
            let (first_time, last_time) = handle.first_and_last_times()?;
            out.times = TimesInfo {
                first_time,
                last_time,
                last_valid_time: handle.last_valid_time(0, 0)?,
            };
            return Ok(out);
        }
        GetQuery::TimeList { start, end, min_interval } => {
            out.time_list = handle.time_list(start, end, min_interval)?;
            return Ok(out);
        }
    };

    let batch = batch.make_unique(unique)?;
    out.batch = if refs_only {
        batch.into_refs_only()
    } else {
        batch
    };
    Ok(out)
}
