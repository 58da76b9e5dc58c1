use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every configuration key named in the external-interfaces contract,
/// loaded by `feemodel-node` from a TOML file via `serde`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Seconds between mempool polls.
    pub poll_period: u64,
    /// Minimum relay feerate a node will forward a transaction at.
    pub min_relay_txfee: Decimal,
    /// Current-priority threshold above which an entry is excluded from
    /// fee observations as a "free" transaction.
    pub priority_thresh: Decimal,
    /// Max MemBlocks kept in the history store.
    pub blocks_to_keep: u32,
    /// History window (in blocks) the pool/tx-rate estimators read over.
    pub window: u32,
    /// Minimum fraction of `window` that must be filled before estimating.
    pub window_fill_thresh: f64,
    pub update_period_pools: u64,
    pub update_period_transient: u64,
    pub min_iters: usize,
    pub max_iters: usize,
    pub max_time_secs: u64,
    /// Reservoir cap for the tx-rate estimator's entrant sample.
    pub tx_max_sample_size: usize,
    /// Half-life, in blocks, of the prediction tracker's decayed score.
    pub block_halflife: f64,
    /// Half-life, in blocks, used when weighting tx-rate history.
    pub txrate_halflife: f64,
    /// Minimum lead time (seconds) for a fee observation to be eligible.
    pub lead_time_offset: u64,
    /// Bootstrap resample count for the stranding-feerate estimator.
    pub num_bootstrap: usize,
    /// Ratio threshold below which a feerate is considered stable.
    pub rate_ratio_thresh: f64,
    /// Quantize grid (sat/kB) for steady-state feerate classes.
    pub quantize: u64,
}

impl EstimatorConfig {
    pub fn max_time(&self) -> Duration {
        Duration::from_secs(self.max_time_secs)
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig {
            poll_period: 10,
            min_relay_txfee: Decimal::from(1000),
            priority_thresh: Decimal::from(57_600_000),
            blocks_to_keep: 2016,
            window: 2016,
            window_fill_thresh: 0.9,
            update_period_pools: 600,
            update_period_transient: 60,
            min_iters: 200,
            max_iters: 10_000,
            max_time_secs: 60,
            tx_max_sample_size: 10_000,
            block_halflife: 12.0,
            txrate_halflife: 2016.0,
            lead_time_offset: 60,
            num_bootstrap: 1000,
            rate_ratio_thresh: 0.9,
            quantize: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = EstimatorConfig::default();
        let s = toml::to_string(&cfg).unwrap();
        let back: EstimatorConfig = toml::from_str(&s).unwrap();
        assert_eq!(back.window, cfg.window);
    }
}
