use crate::error::{Error, Result};
use common::FeeRate;
use rand::Rng;
use rust_decimal::Decimal;
use utils::reservoir::Reservoir;

/// One representative transaction in a tx-rate sample: size and feerate
/// only, stripped of everything else the simulator doesn't need to draw
/// a new arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimTx {
    pub size: u64,
    pub feerate: FeeRate,
}

impl SimTx {
    pub fn new(size: u64, feerate: FeeRate) -> Self {
        SimTx { size, feerate }
    }
}

/// A fitted transaction arrival process: a representative sample of
/// transactions plus the mean arrival rate they were drawn at.
#[derive(Debug, Clone)]
pub struct TxSource {
    sample: Vec<SimTx>,
    tx_rate: f64,
}

impl TxSource {
    pub fn new(sample: Vec<SimTx>, tx_rate: f64) -> Result<Self> {
        if sample.is_empty() && tx_rate > 0.0 {
            return Err(Error::EmptySample);
        }
        Ok(TxSource { sample, tx_rate })
    }

    pub fn sample(&self) -> &[SimTx] {
        &self.sample
    }

    pub fn tx_rate(&self) -> f64 {
        self.tx_rate
    }

    /// Draws one transaction uniformly from the representative sample.
    pub fn draw(&self, rng: &mut impl Rng) -> Option<SimTx> {
        if self.sample.is_empty() {
            return None;
        }
        Some(self.sample[rng.gen_range(0..self.sample.len())])
    }

    pub fn mean_byterate(&self) -> Result<f64> {
        if self.sample.is_empty() {
            return Err(Error::EmptySample);
        }
        let avg_size = self.sample.iter().map(|t| t.size).sum::<u64>() as f64 / self.sample.len() as f64;
        Ok(avg_size * self.tx_rate)
    }

    /// Cumulative byterate at each of `feerates` (strictly increasing):
    /// `(tx_rate / n) * sum(size of sample txs with feerate >= f_i)`, a
    /// right-continuous decreasing step function.
    pub fn byterates(&self, feerates: &[FeeRate]) -> Result<Vec<f64>> {
        if self.sample.is_empty() {
            return Err(Error::EmptySample);
        }
        let n = self.sample.len() as f64;
        Ok(feerates
            .iter()
            .map(|f| {
                let total_size: u64 = self
                    .sample
                    .iter()
                    .filter(|tx| tx.feerate >= *f)
                    .map(|tx| tx.size)
                    .sum();
                (self.tx_rate / n) * total_size as f64
            })
            .collect())
    }

    /// Chooses feerates at 5%..95% (step 5%) weighted quantiles of
    /// per-feerate byterate derived from `cap`'s boundaries, then
    /// iteratively bisects any adjacent pair whose byterate gap exceeds
    /// 10% of the total, matching the original auto-feerate algorithm.
    pub fn auto_feerates(&self, candidate_feerates: &[FeeRate]) -> Result<Vec<FeeRate>> {
        if candidate_feerates.is_empty() {
            return Err(Error::EmptySample);
        }
        let byterates = self.byterates(candidate_feerates)?;
        let diffs: Vec<f64> = (1..candidate_feerates.len())
            .map(|i| byterates[i - 1] - byterates[i])
            .collect();

        let mut picks: Vec<Decimal> = (5..100)
            .step_by(5)
            .map(|p| weighted_percentile(candidate_feerates, &diffs, p as f64 / 100.0))
            .collect();

        let quantize = Decimal::from(200);
        for f in &mut picks {
            *f = (((*f + Decimal::ONE) / quantize).ceil()) * quantize;
        }
        picks.sort();
        picks.dedup();

        let mut feeclasses: Vec<FeeRate> = picks.into_iter().map(FeeRate::Finite).collect();

        loop {
            let byterates = self.byterates(&feeclasses)?;
            let thresh = 0.1 * byterates[0];
            let mut new_classes = Vec::new();
            for idx in 0..byterates.len() - 1 {
                let diff = byterates[idx] - byterates[idx + 1];
                if diff > thresh {
                    if let (FeeRate::Finite(a), FeeRate::Finite(b)) = (feeclasses[idx], feeclasses[idx + 1]) {
                        let gap = b - a;
                        if gap > Decimal::ONE {
                            new_classes.push(FeeRate::Finite(a + gap / Decimal::from(2)));
                        }
                    }
                }
            }
            if new_classes.is_empty() {
                break;
            }
            feeclasses.extend(new_classes);
            feeclasses.sort();
        }

        Ok(feeclasses)
    }
}

/// Weighted percentile over a sorted set of candidate values: walks the
/// (already sorted) data accumulating `weights` until the running total
/// reaches `p` of the overall total.
fn weighted_percentile(sorted_values: &[FeeRate], weights: &[f64], p: f64) -> Decimal {
    let total: f64 = weights.iter().sum();
    let target = total * p;
    let mut running = 0.0;
    for (idx, w) in weights.iter().enumerate() {
        running += w;
        if running >= target {
            return sorted_values[idx].as_finite().unwrap_or(Decimal::ZERO);
        }
    }
    sorted_values
        .last()
        .and_then(|f| f.as_finite())
        .unwrap_or(Decimal::ZERO)
}

/// Builds a `TxSource` from entrant transactions observed across a
/// contiguous block range, reservoir-sampling down to `max_sample_size`.
pub fn estimate_tx_source(
    entrants: impl Iterator<Item = SimTx>,
    elapsed_seconds: f64,
    max_sample_size: usize,
    rng: &mut impl Rng,
) -> Result<TxSource> {
    let mut reservoir = Reservoir::new(max_sample_size);
    for tx in entrants {
        reservoir.push(tx, rng);
    }
    let total_entrants = reservoir.total_seen();
    let tx_rate = if elapsed_seconds > 0.0 {
        total_entrants as f64 / elapsed_seconds
    } else {
        0.0
    };
    TxSource::new(reservoir.into_items(), tx_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn fr(v: i64) -> FeeRate {
        FeeRate::Finite(Decimal::from(v))
    }

    fn ref_source() -> TxSource {
        TxSource::new(
            vec![
                SimTx::new(640, fr(11000)),
                SimTx::new(250, fr(40000)),
                SimTx::new(500, fr(2000)),
            ],
            1.1,
        )
        .unwrap()
    }

    #[test]
    fn byterates_are_cumulative_and_decreasing() {
        let source = ref_source();
        let feerates = [fr(0), fr(2000), fr(10999), fr(20000)];
        let rates = source.byterates(&feerates).unwrap();
        for w in rates.windows(2) {
            assert!(w[1] <= w[0] + 1e-9);
        }
        // every tx qualifies at feerate 0
        let expected_total = (640 + 250 + 500) as f64 * 1.1 / 3.0;
        assert!((rates[0] - expected_total).abs() < 1e-6);
    }

    #[test]
    fn empty_sample_with_positive_rate_errors() {
        assert!(TxSource::new(vec![], 1.0).is_err());
    }

    #[test]
    fn empty_sample_with_zero_rate_is_fine() {
        assert!(TxSource::new(vec![], 0.0).is_ok());
    }

    #[test]
    fn draw_picks_from_sample() {
        let source = ref_source();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
        for _ in 0..20 {
            let tx = source.draw(&mut rng).unwrap();
            assert!(source.sample().contains(&tx));
        }
    }
}
