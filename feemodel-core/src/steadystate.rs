use crate::error::{Error, Result};
use crate::simul::{SimMempool, Simul};
use crate::txsource::TxSource;
use common::FeeRate;
use rand::Rng;
use std::time::{Duration, Instant};
use utils::StopFlag;

/// Steady-state queueing statistics for one feerate class, accumulated
/// from a long run of the simulator started from an empty mempool.
#[derive(Debug, Clone)]
pub struct FeerateClassStats {
    pub feerate: FeeRate,
    pub avg_wait: f64,
    pub strand_fraction: f64,
    pub avg_strand_run_length: f64,
}

/// Per-feerate-class queue statistics from a steady-state simulation run.
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub classes: Vec<FeerateClassStats>,
    pub num_iters: usize,
}

/// Picks the feerate classes a steady-state run tracks: the tx-rate
/// estimator's auto-selected (already `quantize`-rounded) feerates,
/// filtered to those at or above `stable_feerate`.
pub fn select_feerate_classes(
    tx_source: &TxSource,
    capacity_feerates: &[FeeRate],
    stable_feerate: FeeRate,
) -> Result<Vec<FeeRate>> {
    let classes = tx_source.auto_feerates(capacity_feerates)?;
    let filtered: Vec<FeeRate> = classes.into_iter().filter(|f| *f >= stable_feerate).collect();
    if filtered.is_empty() {
        return Err(Error::Unstable(stable_feerate));
    }
    Ok(filtered)
}

/// Runs the simulator from an empty mempool, accumulating `(interval,
/// sfr)` pairs and deriving per-class stats: the fraction of blocks a
/// class is stranded in (`sfr > f`), the average length of consecutive
/// stranded runs, and the mean time to ride out a run.
///
/// Bounded by `[min_iters, max_iters]` (here, one simulated block per
/// iteration) and `max_time`; stops early only once `min_iters` blocks
/// have been processed.
#[allow(clippy::too_many_arguments)]
pub fn estimate_steady_state<R: Rng>(
    sim: &Simul,
    feerate_classes: &[FeeRate],
    min_iters: usize,
    max_iters: usize,
    max_time: Duration,
    rng: R,
    stop: &StopFlag,
) -> Result<QueueStats> {
    if feerate_classes.is_empty() {
        return Err(Error::NoValidTransactions);
    }
    let mut run = sim.run(SimMempool::default(), None, rng)?;

    let mut stranded_blocks = vec![0u64; feerate_classes.len()];
    let mut current_run = vec![0u64; feerate_classes.len()];
    let mut current_run_time = vec![0.0f64; feerate_classes.len()];
    let mut finished_runs = vec![0u64; feerate_classes.len()];
    let mut run_length_total = vec![0u64; feerate_classes.len()];
    let mut wait_total = vec![0.0f64; feerate_classes.len()];

    let start = Instant::now();
    let mut iters = 0usize;
    while iters < max_iters {
        if iters >= min_iters && (stop.is_set() || start.elapsed() >= max_time) {
            break;
        }
        let block = run.step();
        for (idx, &f) in feerate_classes.iter().enumerate() {
            current_run_time[idx] += block.interval;
            if block.sfr > f {
                stranded_blocks[idx] += 1;
                current_run[idx] += 1;
            } else if current_run[idx] > 0 {
                finished_runs[idx] += 1;
                run_length_total[idx] += current_run[idx];
                wait_total[idx] += current_run_time[idx];
                current_run[idx] = 0;
                current_run_time[idx] = 0.0;
            } else {
                current_run_time[idx] = 0.0;
            }
        }
        iters += 1;
    }

    let classes = feerate_classes
        .iter()
        .enumerate()
        .map(|(idx, &feerate)| FeerateClassStats {
            feerate,
            avg_wait: if finished_runs[idx] > 0 {
                wait_total[idx] / finished_runs[idx] as f64
            } else {
                0.0
            },
            strand_fraction: stranded_blocks[idx] as f64 / iters.max(1) as f64,
            avg_strand_run_length: if finished_runs[idx] > 0 {
                run_length_total[idx] as f64 / finished_runs[idx] as f64
            } else {
                0.0
            },
        })
        .collect();

    Ok(QueueStats { classes, num_iters: iters })
}

#[derive(Debug, Clone)]
pub struct SteadyStateEstimate {
    pub stats: QueueStats,
    pub stable_feerate: FeeRate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::{SimPool, SimPools};
    use crate::txsource::SimTx;
    use rand_chacha::ChaCha8Rng;
    use rand::SeedableRng;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn fr(v: i64) -> FeeRate {
        FeeRate::Finite(Decimal::from(v))
    }

    #[test]
    fn stranding_fraction_within_range() {
        let mut pools = BTreeMap::new();
        pools.insert("solo".to_string(), SimPool::new(1.0, 1_000_000, fr(1000)));
        let pools = SimPools::new(pools, 1.0 / 600.0).unwrap();
        let tx_source = TxSource::new(vec![SimTx::new(250, fr(2000))], 0.01).unwrap();
        let sim = Simul::new(pools, tx_source, 0.9).unwrap();

        let classes = [fr(0), fr(500), fr(2000)];
        let rng = ChaCha8Rng::seed_from_u64(7);
        let stop = StopFlag::new();
        let stats = estimate_steady_state(&sim, &classes, 200, 200, Duration::from_secs(5), rng, &stop).unwrap();
        for class in &stats.classes {
            assert!((0.0..=1.0).contains(&class.strand_fraction));
        }
    }
}
