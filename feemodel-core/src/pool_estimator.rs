use crate::error::{Error, Result};
use crate::memblock::MemBlock;
use crate::pools::{SimPool, SimPools};
use crate::stranding::{self, FeeStat, StrandingEstimate};
use common::{BlockHeight, FeeRate};
use rand::Rng;
use std::collections::BTreeMap;

/// Static registry matching a block's coinbase output addresses or tag
/// bytes to a known pool name. Populated from a pool-info file in
/// production; injected here so the estimator stays testable without
/// touching disk.
#[derive(Debug, Clone, Default)]
pub struct PoolInfoRegistry {
    pub payout_addresses: BTreeMap<String, String>,
    pub coinbase_tags: BTreeMap<String, String>,
}

/// One coinbase's identifying features, as reported by the node.
pub struct CoinbaseInfo {
    pub addresses: Vec<String>,
    pub tag: Vec<u8>,
}

/// Per-pool accumulated estimate: its hashrate share, capacity, and
/// minimum feerate policy, plus the diagnostics behind the fit.
#[derive(Debug, Clone)]
pub struct PoolEstimate {
    pub proportion: f64,
    pub block_heights: Vec<BlockHeight>,
    pub max_block_size: u64,
    pub min_feerate: FeeRate,
    pub fee_limited_blocks: Vec<(BlockHeight, u64)>,
    pub size_limited_blocks: Vec<(BlockHeight, u64)>,
    pub stats: Option<StrandingEstimate>,
}

impl PoolEstimate {
    pub fn as_sim_pool(&self) -> SimPool {
        SimPool::new(self.proportion, self.max_block_size, self.min_feerate)
    }
}

/// Matches blocks to pools by coinbase address/tag, producing the
/// `block_map` and then fitting per-pool capacity and feerate policy.
#[derive(Debug, Clone, Default)]
pub struct PoolsEstimator {
    block_map: BTreeMap<BlockHeight, String>,
}

impl PoolsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_map(&self) -> &BTreeMap<BlockHeight, String> {
        &self.block_map
    }

    /// Identifies the pool behind every block in `[start, end)` not
    /// already cached, then discards cached entries that fall outside
    /// the range.
    pub fn id_blocks(
        &mut self,
        start: BlockHeight,
        end: BlockHeight,
        registry: &PoolInfoRegistry,
        coinbase_lookup: impl Fn(BlockHeight) -> Option<CoinbaseInfo>,
    ) {
        let mut height = start;
        while height < end {
            if !self.block_map.contains_key(&height) {
                if let Some(info) = coinbase_lookup(height) {
                    self.assign_pool(height, &info, registry);
                }
            }
            height = height + 1;
        }
        self.block_map.retain(|h, _| *h >= start && *h < end);
    }

    fn assign_pool(&mut self, height: BlockHeight, info: &CoinbaseInfo, registry: &PoolInfoRegistry) {
        for addr in &info.addresses {
            if let Some(name) = registry.payout_addresses.get(addr) {
                self.claim(height, name);
            }
        }
        for (tag, name) in &registry.coinbase_tags {
            if contains_subslice(&info.tag, tag.as_bytes()) {
                self.claim(height, name);
            }
        }
        if !self.block_map.contains_key(&height) {
            if let Some(first) = info.addresses.first() {
                let name = format!("{}_", &first[..first.len().min(12)]);
                self.block_map.insert(height, name);
            }
            // else: unable to identify pool, left unmapped and logged by the caller.
        }
    }

    fn claim(&mut self, height: BlockHeight, name: &str) {
        match self.block_map.get(&height) {
            Some(existing) if existing != name => {
                tracing::warn!(height = %height, existing, new = name, "conflicting pool match for block, keeping first");
            }
            Some(_) => {}
            None => {
                self.block_map.insert(height, name.to_string());
            }
        }
    }

    /// Fits a `PoolEstimate` for every pool named in `block_map`, reading
    /// each pool's blocks via `read_block` (typically backed by the
    /// history store).
    pub fn estimate_pools(
        &self,
        num_bootstrap: usize,
        lead_time_offset: u64,
        priority_thresh: rust_decimal::Decimal,
        min_relay_txfee: FeeRate,
        read_block: impl Fn(BlockHeight) -> Option<MemBlock>,
        rng: &mut impl Rng,
    ) -> Result<BTreeMap<String, PoolEstimate>> {
        if self.block_map.is_empty() {
            return Err(Error::BlockRangeEmpty(BlockHeight::new(0), BlockHeight::new(0)));
        }
        let total = self.block_map.len() as f64;
        let mut pool_names: Vec<&String> = self.block_map.values().collect();
        pool_names.sort();
        pool_names.dedup();

        let mut out = BTreeMap::new();
        for name in pool_names {
            let heights: Vec<BlockHeight> = self
                .block_map
                .iter()
                .filter(|(_, n)| *n == name)
                .map(|(h, _)| *h)
                .collect();
            let proportion = heights.len() as f64 / total;
            let estimate = estimate_pool_params(
                proportion,
                heights,
                num_bootstrap,
                lead_time_offset,
                priority_thresh,
                min_relay_txfee,
                &read_block,
                rng,
            )?;
            out.insert(name.clone(), estimate);
        }
        Ok(out)
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[allow(clippy::too_many_arguments)]
fn estimate_pool_params(
    proportion: f64,
    block_heights: Vec<BlockHeight>,
    num_bootstrap: usize,
    lead_time_offset: u64,
    priority_thresh: rust_decimal::Decimal,
    min_relay_txfee: FeeRate,
    read_block: &impl Fn(BlockHeight) -> Option<MemBlock>,
    rng: &mut impl Rng,
) -> Result<PoolEstimate> {
    let mut max_block_size: u64 = 0;
    let mut fee_limited_blocks = Vec::new();
    let mut size_limited_blocks = Vec::new();
    let mut deferred = Vec::new();
    let mut observations = Vec::new();

    let mut blocks = Vec::new();
    for height in &block_heights {
        match read_block(*height) {
            Some(b) => blocks.push(b),
            None => tracing::warn!(height = %height, "pool estimation: missing history block, skipping"),
        }
    }

    // First pass: establish max_block_size from any block that exceeds
    // the running maximum, deferring its classification until the final
    // size is known (matches the original online algorithm's two-pass
    // structure for a single scan over history).
    for block in blocks {
        if block.block_size() > max_block_size {
            max_block_size = block.block_size();
            deferred.push(block);
            continue;
        }
        classify_block(&block, max_block_size, lead_time_offset, priority_thresh, min_relay_txfee, &mut fee_limited_blocks, &mut size_limited_blocks, &mut observations);
    }
    for block in &deferred {
        classify_block(block, max_block_size, lead_time_offset, priority_thresh, min_relay_txfee, &mut fee_limited_blocks, &mut size_limited_blocks, &mut observations);
    }

    if observations.is_empty() {
        if let Some(smallest) = deferred.iter().min_by_key(|b| b.block_size()) {
            collect_observations(smallest, lead_time_offset, priority_thresh, min_relay_txfee, &mut observations);
        }
    }

    let nblocks = fee_limited_blocks.len() + size_limited_blocks.len();
    if nblocks < block_heights.len() {
        tracing::warn!(
            found = nblocks,
            expected = block_heights.len(),
            "pool estimation: only found a subset of expected memblocks"
        );
    }

    let stats = if observations.is_empty() {
        None
    } else {
        Some(stranding::estimate_stranding_feerate(&observations, num_bootstrap, rng)?)
    };
    let min_feerate = stats.as_ref().map(|s| s.sfr).unwrap_or(FeeRate::Infinite);

    Ok(PoolEstimate {
        proportion,
        block_heights,
        max_block_size,
        min_feerate,
        fee_limited_blocks,
        size_limited_blocks,
        stats,
    })
}

#[allow(clippy::too_many_arguments)]
fn classify_block(
    block: &MemBlock,
    max_block_size: u64,
    lead_time_offset: u64,
    priority_thresh: rust_decimal::Decimal,
    min_relay_txfee: FeeRate,
    fee_limited: &mut Vec<(BlockHeight, u64)>,
    size_limited: &mut Vec<(BlockHeight, u64)>,
    observations: &mut Vec<FeeStat>,
) {
    let in_block_sizes: Vec<u64> = block
        .entries()
        .values()
        .filter(|e| e.outcome().is_some_and(|o| o.in_block))
        .map(|e| e.size())
        .collect();
    let avg_tx_size = if in_block_sizes.is_empty() {
        0.0
    } else {
        in_block_sizes.iter().sum::<u64>() as f64 / in_block_sizes.len() as f64
    };

    if max_block_size as f64 - block.block_size() as f64 > avg_tx_size {
        fee_limited.push((block.height(), block.block_size()));
        collect_observations(block, lead_time_offset, priority_thresh, min_relay_txfee, observations);
    } else {
        size_limited.push((block.height(), block.block_size()));
    }
}

fn collect_observations(
    block: &MemBlock,
    lead_time_offset: u64,
    priority_thresh: rust_decimal::Decimal,
    min_relay_txfee: FeeRate,
    observations: &mut Vec<FeeStat>,
) {
    let min_lead_time = block
        .entries()
        .values()
        .filter_map(|e| e.outcome().map(|o| o.lead_time))
        .min();
    let Some(min_lead_time) = min_lead_time else {
        return;
    };
    let lead_time_thresh = min_lead_time + lead_time_offset;

    for entry in block.entries().values() {
        let deps_ok = entry.depends().iter().all(|dep| {
            block
                .entry(dep)
                .is_some_and(|d| d.outcome().is_some_and(|o| o.in_block))
        });
        if !deps_ok {
            continue;
        }
        if entry.is_high_priority(priority_thresh, min_relay_txfee) {
            continue;
        }
        let Some(outcome) = entry.outcome() else {
            continue;
        };
        if outcome.lead_time < lead_time_thresh {
            continue;
        }
        observations.push(FeeStat {
            feerate: entry.feerate(),
            in_block: outcome.in_block,
        });
    }
}

/// Mean seconds between consecutive blocks in `[start, end)`, used to
/// derive `SimPools::block_rate`.
pub fn estimate_block_interval(timestamps: &[(BlockHeight, u64)]) -> Result<f64> {
    if timestamps.len() < 2 {
        return Err(Error::BadBlockRange("need at least two block timestamps".into()));
    }
    let start_time = timestamps.first().unwrap().1;
    let end_time = timestamps.last().unwrap().1;
    let num_intervals = timestamps.len() as u64 - 1;
    if end_time <= start_time {
        return Err(Error::BadBlockRange("time interval is zero or negative".into()));
    }
    Ok((end_time - start_time) as f64 / num_intervals as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_interval_rejects_degenerate_range() {
        assert!(estimate_block_interval(&[(BlockHeight::new(0), 0)]).is_err());
    }

    #[test]
    fn block_interval_averages_correctly() {
        let ts = vec![
            (BlockHeight::new(0), 0),
            (BlockHeight::new(1), 600),
            (BlockHeight::new(2), 1100),
        ];
        let interval = estimate_block_interval(&ts).unwrap();
        assert!((interval - 550.0).abs() < 1e-9);
    }
}
