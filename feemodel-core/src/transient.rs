use crate::error::{Error, Result};
use crate::predict::TxPrediction;
use crate::simul::{SimMempool, Simul};
use common::{FeeRate, UnixTime};
use rand::Rng;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use utils::StopFlag;

/// Monotone-decreasing piecewise-linear function from feerate to a wait
/// value (expected wait or a percentile wait), with a defined inverse.
/// Feerates are stored ascending; values are non-increasing as feerate
/// increases, matching the original `WaitFn`'s interpolation table.
#[derive(Debug, Clone)]
pub struct WaitFn {
    feerates: Vec<f64>,
    waits: Vec<f64>,
}

impl WaitFn {
    pub fn new(feerates: Vec<f64>, waits: Vec<f64>) -> Self {
        debug_assert_eq!(feerates.len(), waits.len());
        WaitFn { feerates, waits }
    }

    /// Linear interpolation, clamped to the endpoints outside the table's
    /// range (the original's `interpolate` behaviour: flat extrapolation).
    pub fn call(&self, feerate: f64) -> f64 {
        interpolate(&self.feerates, &self.waits, feerate)
    }

    /// Inverse lookup: the feerate at which the expected (or percentile)
    /// wait equals `wait`. Valid since `waits` is monotone non-increasing
    /// in `feerates`.
    pub fn inv(&self, wait: f64) -> f64 {
        let mut xs = self.waits.clone();
        let mut ys = self.feerates.clone();
        // waits is non-increasing; interpolate() wants its x-table
        // ascending, so reverse both together.
        xs.reverse();
        ys.reverse();
        interpolate(&xs, &ys, wait)
    }
}

fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    if x <= xs[0] {
        return ys[0];
    }
    if x >= *xs.last().unwrap() {
        return *ys.last().unwrap();
    }
    for i in 1..xs.len() {
        if x <= xs[i] {
            let (x0, x1) = (xs[i - 1], xs[i]);
            let (y0, y1) = (ys[i - 1], ys[i]);
            if (x1 - x0).abs() < f64::EPSILON {
                return y0;
            }
            let t = (x - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    *ys.last().unwrap()
}

/// Result of a transient-statistics run started from a particular
/// mempool snapshot: wait-time expectations and percentiles as a
/// function of feerate, plus a factory for per-tx predictions.
#[derive(Debug, Clone)]
pub struct TransientStats {
    pub feerates: Vec<FeeRate>,
    pub expected_waits: WaitFn,
    pub percentile_waits: BTreeMap<u32, WaitFn>,
    pub num_iters: usize,
}

impl TransientStats {
    /// Freezes a prediction for a transaction entering now at `feerate`,
    /// reading off the expected wait and the full percentile grid at that
    /// feerate from the current snapshot.
    pub fn predict(&self, feerate: FeeRate, now: UnixTime) -> TxPrediction {
        let f = feerate.to_f64_lossy();
        let expected_wait = self.expected_waits.call(f);
        let percentile_waits = self
            .percentile_waits
            .iter()
            .map(|(p, wf)| (*p as f64 / 100.0, wf.call(f)))
            .collect();
        TxPrediction::new(now, expected_wait, percentile_waits)
    }
}

/// Default wait-percentile grid: 5%, 10%, ..., 95%.
pub fn default_percentiles() -> Vec<u32> {
    (5..100).step_by(5).collect()
}

/// Runs many short simulations from `initial_mempool`, each tracking the
/// simulated time until the first block whose `sfr <= f`, for every
/// `f` in `feerates`. Bounded by `[min_iters, max_iters]` and `max_time`;
/// stops early (once `min_iters` is met) if `stop` is set or time runs
/// out.
#[allow(clippy::too_many_arguments)]
pub fn estimate_transient_stats<R: Rng>(
    sim: &Simul,
    initial_mempool: &SimMempool,
    feerates: &[FeeRate],
    min_iters: usize,
    max_iters: usize,
    max_time: Duration,
    percentiles: &[u32],
    rng: &mut R,
    stop: &StopFlag,
) -> Result<TransientStats>
where
    R: rand::RngCore + rand::SeedableRng,
{
    if feerates.is_empty() {
        return Err(Error::NoValidTransactions);
    }
    let start = Instant::now();
    let mut samples: Vec<Vec<f64>> = vec![Vec::new(); feerates.len()];

    let mut iters = 0usize;
    while iters < max_iters {
        if iters >= min_iters && (stop.is_set() || start.elapsed() >= max_time) {
            break;
        }
        let seed = rng.next_u64();
        let run_rng = R::seed_from_u64(seed);
        let mut run = sim.run(initial_mempool.clone(), None, run_rng)?;

        let mut elapsed = 0.0;
        let mut remaining: Vec<usize> = (0..feerates.len()).collect();
        // a block's capacity only grows over time, so once a feerate
        // class is hit it stays hit; cap the per-iteration block count
        // to avoid spinning forever on a pathologically slow class.
        for _ in 0..100_000 {
            if remaining.is_empty() {
                break;
            }
            let block = run.step();
            elapsed += block.interval;
            remaining.retain(|&idx| {
                if block.sfr <= feerates[idx] {
                    samples[idx].push(elapsed);
                    false
                } else {
                    true
                }
            });
        }
        iters += 1;
    }

    let expected: Vec<f64> = samples
        .iter()
        .map(|s| {
            if s.is_empty() {
                f64::INFINITY
            } else {
                s.iter().sum::<f64>() / s.len() as f64
            }
        })
        .collect();

    let fr_values: Vec<f64> = feerates.iter().map(|f| f.to_f64_lossy()).collect();
    let expected_waits = WaitFn::new(fr_values.clone(), expected);

    let mut percentile_waits = BTreeMap::new();
    for &p in percentiles {
        let waits: Vec<f64> = samples
            .iter()
            .map(|s| percentile_of(s, p as f64 / 100.0))
            .collect();
        percentile_waits.insert(p, WaitFn::new(fr_values.clone(), waits));
    }

    Ok(TransientStats {
        feerates: feerates.to_vec(),
        expected_waits,
        percentile_waits,
        num_iters: iters,
    })
}

fn percentile_of(samples: &[f64], p: f64) -> f64 {
    if samples.is_empty() {
        return f64::INFINITY;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_fn_interpolates_linearly() {
        let f = WaitFn::new(vec![0.0, 1000.0, 2000.0], vec![600.0, 300.0, 100.0]);
        assert_eq!(f.call(500.0), 450.0);
        assert_eq!(f.call(-10.0), 600.0);
        assert_eq!(f.call(5000.0), 100.0);
    }

    #[test]
    fn wait_fn_inverse_round_trips() {
        let f = WaitFn::new(vec![0.0, 1000.0, 2000.0], vec![600.0, 300.0, 100.0]);
        let wait = f.call(750.0);
        let back = f.inv(wait);
        assert!((back - 750.0).abs() < 1e-6);
    }
}
