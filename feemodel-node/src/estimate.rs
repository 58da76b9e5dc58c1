//! Glue between the history store and the C2/C3 estimators: reads the
//! configured rolling window of `MemBlock`s and produces the
//! `(SimPools, TxSource)` pair the pools worker publishes.

use common::BlockHeight;
use feemodel_core::config::EstimatorConfig;
use feemodel_core::history::HistoryStore;
use feemodel_core::pool_estimator::{CoinbaseInfo, PoolInfoRegistry, PoolsEstimator};
use feemodel_core::txsource::{estimate_tx_source, SimTx};
use feemodel_core::{Error, Result, SimPools, TxSource};
use rand::Rng;
use std::collections::BTreeMap;

/// Fraction of `[a, b)` for which a `MemBlock` is actually present in
/// the history store — the "window fill ratio" the orchestrator's pools
/// worker waits on before it will estimate.
pub fn window_fill_ratio(history: &dyn HistoryStore, start: BlockHeight, end: BlockHeight) -> f64 {
    if end <= start {
        return 0.0;
    }
    let want = (end.as_u32() - start.as_u32()) as f64;
    let have = history
        .list_heights(Some(start..end))
        .map(|hs| hs.len())
        .unwrap_or(0) as f64;
    have / want
}

/// Runs the pool identifier/estimator (C2) and the tx-rate estimator
/// (C3) over `[start, end)`, using `coinbase_lookup` to resolve each
/// not-yet-cached block's coinbase info (normally backed by the
/// `NodeClient`, injected here so the estimator stays testable without
/// a live node).
pub fn estimate_pools_and_tx_source(
    history: &dyn HistoryStore,
    start: BlockHeight,
    end: BlockHeight,
    registry: &PoolInfoRegistry,
    config: &EstimatorConfig,
    coinbase_lookup: impl Fn(BlockHeight) -> Option<CoinbaseInfo>,
    rng: &mut impl Rng,
) -> Result<(SimPools, TxSource)> {
    let mut estimator = PoolsEstimator::new();
    estimator.id_blocks(start, end, registry, coinbase_lookup);

    let read_block = |h: BlockHeight| history.read(h).ok().flatten();
    let pool_estimates = estimator.estimate_pools(
        config.num_bootstrap,
        config.lead_time_offset,
        config.priority_thresh,
        common::FeeRate::Finite(config.min_relay_txfee),
        read_block,
        rng,
    )?;

    let mut pools_map = BTreeMap::new();
    for (name, estimate) in &pool_estimates {
        pools_map.insert(name.clone(), estimate.as_sim_pool());
    }

    let heights = history
        .list_heights(Some(start..end))?;
    if heights.len() < 2 {
        return Err(Error::BlockRangeEmpty(start, end));
    }
    let mut timestamps = Vec::with_capacity(heights.len());
    for h in &heights {
        if let Some(block) = history.read(*h)? {
            timestamps.push((*h, block.time()));
        }
    }
    let block_rate = 1.0 / feemodel_core::pool_estimator::estimate_block_interval(&timestamps)?;
    let pools = SimPools::new(pools_map, block_rate)?;

    let entrants = gather_entrants(history, &heights)?;
    let elapsed = timestamps.last().map(|t| t.1).unwrap_or(0) as f64
        - timestamps.first().map(|t| t.1).unwrap_or(0) as f64;
    let tx_source = estimate_tx_source(entrants.into_iter(), elapsed.max(0.0), config.tx_max_sample_size, rng)?;

    Ok((pools, tx_source))
}

/// Transactions that appear in snapshot `h[i+1]` but not in `h[i]`,
/// across the whole window: the entrant sample the tx-rate estimator
/// draws its reservoir from.
fn gather_entrants(history: &dyn HistoryStore, heights: &[BlockHeight]) -> Result<Vec<SimTx>> {
    let mut entrants = Vec::new();
    for pair in heights.windows(2) {
        let (Some(prev), Some(next)) = (history.read(pair[0])?, history.read(pair[1])?) else {
            continue;
        };
        for (txid, entry) in next.entries() {
            if prev.entry(txid).is_none() {
                entrants.push(SimTx::new(entry.size(), entry.feerate()));
            }
        }
    }
    Ok(entrants)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_ratio_is_zero_on_empty_store() {
        let store = storage::SqliteHistoryStore::in_memory().unwrap();
        let ratio = window_fill_ratio(&store, BlockHeight::new(0), BlockHeight::new(10));
        assert_eq!(ratio, 0.0);
    }

    #[test]
    fn fill_ratio_reflects_partial_coverage() {
        let store = storage::SqliteHistoryStore::in_memory().unwrap();
        for h in 0..5u32 {
            let block = feemodel_core::MemBlock::new(BlockHeight::new(h + 1), 1000, h as u64, Default::default());
            store.write(&block, 100).unwrap();
        }
        let ratio = window_fill_ratio(&store, BlockHeight::new(0), BlockHeight::new(10));
        assert!((ratio - 0.5).abs() < 1e-9);
    }
}
