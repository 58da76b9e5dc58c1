use common::FeeRate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// One mining pool's simulated policy: how much hashrate it commands,
/// how large a block it will produce, and the minimum feerate it will
/// include a transaction at.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimPool {
    pub hashrate: f64,
    pub max_block_size: u64,
    pub min_feerate: FeeRate,
}

impl SimPool {
    pub fn new(hashrate: f64, max_block_size: u64, min_feerate: FeeRate) -> Self {
        SimPool {
            hashrate,
            max_block_size,
            min_feerate,
        }
    }
}

/// The unordered set of pools the simulator draws from, plus the block
/// rate derived from historical block intervals.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SimPools {
    pools: BTreeMap<String, SimPool>,
    block_rate: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SimPoolsError {
    #[error("pool set must have at least one pool with finite min_feerate and positive max_block_size")]
    NoCapacity,
}

impl SimPools {
    pub fn new(pools: BTreeMap<String, SimPool>, block_rate: f64) -> Result<Self, SimPoolsError> {
        let has_capacity = pools
            .values()
            .any(|p| !p.min_feerate.is_infinite() && p.max_block_size > 0);
        if !has_capacity {
            return Err(SimPoolsError::NoCapacity);
        }
        Ok(SimPools { pools, block_rate })
    }

    pub fn pools(&self) -> &BTreeMap<String, SimPool> {
        &self.pools
    }

    pub fn block_rate(&self) -> f64 {
        self.block_rate
    }

    fn total_hashrate(&self) -> f64 {
        self.pools.values().map(|p| p.hashrate).sum()
    }

    /// Samples a pool name proportionally to normalised hashrate.
    pub fn sample_pool(&self, rng: &mut impl rand::Rng) -> (&str, &SimPool) {
        let total = self.total_hashrate();
        let mut target = rng.gen::<f64>() * total;
        let mut last = self.pools.iter().next().expect("pools non-empty");
        for (name, pool) in &self.pools {
            last = (name, pool);
            if target < pool.hashrate {
                return (name.as_str(), pool);
            }
            target -= pool.hashrate;
        }
        (last.0.as_str(), last.1)
    }

    /// Distinct minimum feerates, sorted ascending, with a leading zero
    /// boundary, and the cumulative lower/upper byterate capacity at
    /// each boundary. Lower capacity also counts pools whose
    /// `min_feerate` equals the boundary (a tx paying exactly that
    /// feerate is still accepted by the pool) — this is the array
    /// `stable_feerate` and the feeclass filter consume. Upper capacity
    /// is the conservative variant that counts only pools with a
    /// strictly lower `min_feerate`.
    pub fn capacity(&self) -> Result<Capacity, SimPoolsError> {
        if self.pools.is_empty() {
            return Err(SimPoolsError::NoCapacity);
        }
        let total_hashrate = self.total_hashrate();
        let mut finite_rates: Vec<Decimal> = self
            .pools
            .values()
            .filter_map(|p| p.min_feerate.as_finite())
            .collect();
        finite_rates.sort();
        finite_rates.dedup();

        let mut feerates = vec![FeeRate::ZERO];
        feerates.extend(finite_rates.into_iter().map(FeeRate::Finite));

        let mut cap_lower = Vec::with_capacity(feerates.len());
        let mut cap_upper = Vec::with_capacity(feerates.len());
        for f in &feerates {
            // Lower capacity includes pools whose threshold exactly equals
            // the boundary (a tx paying exactly the minimum is still
            // accepted by that pool) — this is the array `calc_stablefeerate`
            // consumes. Upper capacity is the conservative variant that
            // excludes them.
            let lower: f64 = self
                .pools
                .values()
                .filter(|p| p.min_feerate <= *f)
                .map(|p| p.hashrate / total_hashrate * p.max_block_size as f64 * self.block_rate)
                .sum();
            let upper: f64 = self
                .pools
                .values()
                .filter(|p| p.min_feerate < *f)
                .map(|p| p.hashrate / total_hashrate * p.max_block_size as f64 * self.block_rate)
                .sum();
            cap_lower.push(lower);
            cap_upper.push(upper);
        }

        Ok(Capacity {
            feerates,
            cap_lower,
            cap_upper,
        })
    }
}

/// The non-decreasing step-function capacity described in the data
/// model: aggregate byterate capacity available at and below each
/// distinct pool minimum feerate.
#[derive(Debug, Clone)]
pub struct Capacity {
    pub feerates: Vec<FeeRate>,
    pub cap_lower: Vec<f64>,
    pub cap_upper: Vec<f64>,
}

impl Capacity {
    /// Smallest feerate at which `tx_byterate / cap_lower` drops to or
    /// below `rate_ratio_thresh`. `None` (treated as `Unstable`) if no
    /// such feerate exists in range.
    pub fn stable_feerate(&self, tx_byterates: &[f64], rate_ratio_thresh: f64) -> Option<FeeRate> {
        for idx in 0..self.feerates.len() {
            if self.cap_lower[idx] == 0.0 {
                continue;
            }
            let ratio = tx_byterates[idx] / self.cap_lower[idx];
            if ratio <= rate_ratio_thresh {
                return Some(self.feerates[idx]);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn ref_pools() -> BTreeMap<String, SimPool> {
        let mut m = BTreeMap::new();
        m.insert(
            "pool0".to_string(),
            SimPool::new(0.2, 500_000, FeeRate::Finite(Decimal::from(20000))),
        );
        m.insert(
            "pool1".to_string(),
            SimPool::new(0.3, 750_000, FeeRate::Finite(Decimal::from(10000))),
        );
        m.insert(
            "pool2".to_string(),
            SimPool::new(0.5, 1_000_000, FeeRate::Finite(Decimal::from(1000))),
        );
        m
    }

    #[test]
    fn capacity_matches_reference_cumulative_shape() {
        let pools = SimPools::new(ref_pools(), 1.0 / 600.0).unwrap();
        let cap = pools.capacity().unwrap();
        assert_eq!(cap.feerates.len(), 4);
        assert_eq!(cap.feerates[0], FeeRate::ZERO);

        // S2: cap_lower is the inclusive (<=) cumulative array.
        let expected_lower = [
            0.0,
            0.5 * 1_000_000.0 / 600.0,
            0.5 * 1_000_000.0 / 600.0 + 0.3 * 750_000.0 / 600.0,
            0.5 * 1_000_000.0 / 600.0 + 0.3 * 750_000.0 / 600.0 + 0.2 * 500_000.0 / 600.0,
        ];
        for (got, want) in cap.cap_lower.iter().zip(expected_lower.iter()) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }

        // cap_upper is the exclusive (<) variant: it lags cap_lower by one
        // boundary, since a pool's own threshold is excluded until the
        // next one.
        assert_eq!(cap.cap_upper[0], 0.0);
        for i in 1..cap.cap_upper.len() {
            assert!((cap.cap_upper[i] - expected_lower[i - 1]).abs() < 1e-6);
        }

        // capacity is non-decreasing across boundaries
        for w in cap.cap_lower.windows(2) {
            assert!(w[1] >= w[0] - 1e-9);
        }
    }

    #[test]
    fn stable_feerate_uses_first_boundary_with_nonzero_lower_capacity() {
        let pools = SimPools::new(ref_pools(), 1.0 / 600.0).unwrap();
        let cap = pools.capacity().unwrap();
        // cap_lower[1] (feerate 1000) is pool2's 1_000_000/600 byterate,
        // well above a byterate of 1000 at a 0.9 ratio threshold, so
        // feerate 1000 is already stable and must be returned, not 10000.
        let tx_byterates = vec![1000.0; cap.feerates.len()];
        let sfr = cap.stable_feerate(&tx_byterates, 0.9).unwrap();
        assert_eq!(sfr, FeeRate::Finite(Decimal::from(1000)));
    }

    #[test]
    fn empty_pools_rejected() {
        assert_eq!(
            SimPools::new(BTreeMap::new(), 1.0).unwrap_err(),
            SimPoolsError::NoCapacity
        );
    }

    #[test]
    fn all_infinite_minfeerate_rejected() {
        let mut pools = ref_pools();
        for p in pools.values_mut() {
            p.min_feerate = FeeRate::Infinite;
        }
        assert_eq!(SimPools::new(pools, 1.0).unwrap_err(), SimPoolsError::NoCapacity);
    }

    #[test]
    fn pool_sampling_converges_to_hashrate() {
        let pools = SimPools::new(ref_pools(), 1.0 / 600.0).unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        let n = 10_000;
        for _ in 0..n {
            let (name, _) = pools.sample_pool(&mut rng);
            *counts.entry(name.to_string()).or_default() += 1;
        }
        for (name, pool) in pools.pools() {
            let freq = counts[name] as f64 / n as f64;
            assert!((freq - pool.hashrate).abs() < 0.01, "{name}: {freq} vs {}", pool.hashrate);
        }
    }
}
