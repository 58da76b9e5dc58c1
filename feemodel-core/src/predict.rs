use crate::memblock::MemBlock;
use common::{TxId, UnixTime};
use std::collections::HashMap;

/// A frozen expected-wait survival curve for one transaction, captured at
/// the moment the prediction was made. `wait_thresholds`/`percentiles`
/// are a monotone CDF in the wait domain, anchored at `(0, 0)` and
/// `(+inf, 1)` so `calc_pval` behaves correctly at the boundaries.
#[derive(Debug, Clone)]
pub struct TxPrediction {
    entry_time: UnixTime,
    expected_wait: f64,
    wait_thresholds: Vec<f64>,
    percentiles: Vec<f64>,
}

impl TxPrediction {
    pub fn new(entry_time: UnixTime, expected_wait: f64, mut percentile_waits: Vec<(f64, f64)>) -> Self {
        percentile_waits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let mut wait_thresholds = vec![0.0];
        let mut percentiles = vec![0.0];
        for (p, w) in percentile_waits {
            wait_thresholds.push(w);
            percentiles.push(p);
        }
        wait_thresholds.push(f64::INFINITY);
        percentiles.push(1.0);
        TxPrediction {
            entry_time,
            expected_wait,
            wait_thresholds,
            percentiles,
        }
    }

    pub fn entry_time(&self) -> UnixTime {
        self.entry_time
    }

    pub fn expected_wait(&self) -> f64 {
        self.expected_wait
    }

    fn cdf(&self, wait: f64) -> f64 {
        if wait <= 0.0 {
            return 0.0;
        }
        for i in 1..self.wait_thresholds.len() {
            if wait <= self.wait_thresholds[i] {
                let (w0, w1) = (self.wait_thresholds[i - 1], self.wait_thresholds[i]);
                let (p0, p1) = (self.percentiles[i - 1], self.percentiles[i]);
                if !w1.is_finite() {
                    return p1;
                }
                if (w1 - w0).abs() < f64::EPSILON {
                    return p1;
                }
                let t = (wait - w0) / (w1 - w0);
                return p0 + t * (p1 - p0);
            }
        }
        1.0
    }

    /// `P(W >= observed_wait | this prediction)`, where `observed_wait =
    /// now - entry_time`.
    pub fn calc_pval(&self, now: UnixTime) -> f64 {
        let observed = now.saturating_sub(self.entry_time) as f64;
        (1.0 - self.cdf(observed)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionState {
    Tracked,
    Confirmed,
    Evicted,
}

/// Time-decayed accuracy score: running mean of `pval` observations with
/// exponential decay by block count, half-life `block_halflife`.
#[derive(Debug, Clone)]
struct DecayedScore {
    weighted_sum: f64,
    weight: f64,
    halflife: f64,
}

impl DecayedScore {
    fn new(halflife: f64) -> Self {
        DecayedScore {
            weighted_sum: 0.0,
            weight: 0.0,
            halflife,
        }
    }

    fn decay_one_block(&mut self) {
        let factor = 0.5f64.powf(1.0 / self.halflife);
        self.weighted_sum *= factor;
        self.weight *= factor;
    }

    fn observe(&mut self, pval: f64) {
        self.weighted_sum += pval;
        self.weight += 1.0;
    }

    fn mean(&self) -> Option<f64> {
        if self.weight <= 0.0 {
            None
        } else {
            Some(self.weighted_sum / self.weight)
        }
    }
}

/// Tracks live per-tx predictions against observed confirmation times,
/// scoring how well the transient estimator's survival curves held up.
pub struct PredictionTracker {
    predictions: HashMap<TxId, TxPrediction>,
    score: DecayedScore,
}

impl PredictionTracker {
    pub fn new(block_halflife: f64) -> Self {
        PredictionTracker {
            predictions: HashMap::new(),
            score: DecayedScore::new(block_halflife),
        }
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn score(&self) -> Option<f64> {
        self.score.mean()
    }

    /// Adds a prediction for every currently-tracked entry not already
    /// present, and drops any tracked prediction whose txid is no longer
    /// in `current_entries` (it left the mempool without confirming —
    /// replaced, RBF'd, or conflicted out).
    pub fn update_predictions(
        &mut self,
        current_entries: impl Iterator<Item = (TxId, TxPrediction)>,
    ) {
        let mut seen = std::collections::HashSet::new();
        for (txid, prediction) in current_entries {
            seen.insert(txid);
            self.predictions.entry(txid).or_insert(prediction);
        }
        self.predictions.retain(|txid, _| seen.contains(txid));
    }

    /// Scores every confirmed transaction in `blocks` against its frozen
    /// prediction, then decays the running score by one block and
    /// removes confirmed/evicted entries.
    pub fn process_blocks(&mut self, blocks: &[MemBlock]) {
        for block in blocks {
            self.score.decay_one_block();
            for txid in block.confirmed_txids() {
                if let Some(prediction) = self.predictions.remove(txid) {
                    let pval = prediction.calc_pval(block.time());
                    self.score.observe(pval);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pval_at_entry_time_is_one() {
        let pred = TxPrediction::new(1000, 600.0, vec![(0.5, 600.0), (0.9, 1800.0)]);
        assert_eq!(pred.calc_pval(1000), 1.0);
    }

    #[test]
    fn pval_far_in_future_is_zero() {
        let pred = TxPrediction::new(1000, 600.0, vec![(0.5, 600.0), (0.9, 1800.0)]);
        assert_eq!(pred.calc_pval(1000 + 10_000_000), 0.0);
    }

    #[test]
    fn pval_at_median_wait_is_roughly_half() {
        let pred = TxPrediction::new(1000, 600.0, vec![(0.5, 600.0), (0.9, 1800.0)]);
        let pval = pred.calc_pval(1000 + 600);
        assert!((pval - 0.5).abs() < 1e-9);
    }
}
