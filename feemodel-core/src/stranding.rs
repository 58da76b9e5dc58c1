use crate::error::{Error, Result};
use common::FeeRate;
use rand::Rng;
use std::collections::BTreeMap;

/// One transaction's inclusion observation for the stranding-feerate
/// estimator: its feerate and whether the block that produced this
/// observation actually confirmed it.
#[derive(Debug, Clone, Copy)]
pub struct FeeStat {
    pub feerate: FeeRate,
    pub in_block: bool,
}

/// Result of estimating the stranding feerate from one block's filtered
/// transaction observations.
#[derive(Debug, Clone)]
pub struct StrandingEstimate {
    pub sfr: FeeRate,
    pub bias: f64,
    pub std: f64,
    pub above_kn: (i64, i64),
    pub below_kn: (i64, i64),
}

/// Finds the feerate threshold that best separates included from
/// excluded transactions: walk observations sorted by feerate
/// descending, maintaining a running score that increases by one for
/// each included tx and decreases by one for each excluded tx at the
/// current or higher feerate, and take the smallest feerate achieving
/// the maximum score.
fn calc_min_feerate_single(sorted_desc: &[FeeStat]) -> FeeRate {
    let mut kvals: BTreeMap<FeeRate, i64> = BTreeMap::new();
    kvals.insert(FeeRate::Infinite, 0);
    let mut feerate_curr = FeeRate::Infinite;

    for stat in sorted_desc {
        if stat.feerate < feerate_curr {
            let carry = kvals[&feerate_curr];
            kvals.insert(stat.feerate, carry);
            feerate_curr = stat.feerate;
        }
        *kvals.get_mut(&feerate_curr).unwrap() += if stat.in_block { 1 } else { -1 };
    }

    let maxk = *kvals.values().max().expect("kvals always has >=1 entry");
    kvals
        .into_iter()
        .filter(|(_, k)| *k == maxk)
        .map(|(f, _)| f)
        .min()
        .expect("at least one feerate achieves the max")
}

/// Estimates the stranding feerate and its bootstrap confidence from a
/// set of filtered per-transaction observations (already excluding
/// dependency-violators, high-priority entries, and entries too recent
/// to have reached the miner).
pub fn estimate_stranding_feerate(
    observations: &[FeeStat],
    num_bootstrap: usize,
    rng: &mut impl Rng,
) -> Result<StrandingEstimate> {
    if observations.is_empty() {
        return Err(Error::NoValidTransactions);
    }

    let mut sorted_desc = observations.to_vec();
    sorted_desc.sort_by(|a, b| b.feerate.cmp(&a.feerate));

    let sfr = calc_min_feerate_single(&sorted_desc);

    let above: Vec<&FeeStat> = sorted_desc.iter().filter(|s| s.feerate >= sfr).collect();
    let below: Vec<&FeeStat> = sorted_desc.iter().filter(|s| s.feerate < sfr).collect();
    let k_above = above.iter().filter(|s| s.in_block).count() as i64;
    let k_below = below.iter().filter(|s| !s.in_block).count() as i64;
    let above_kn = (k_above, above.len() as i64);
    let below_kn = (k_below, below.len() as i64);

    if sfr.is_infinite() {
        return Ok(StrandingEstimate {
            sfr,
            bias: f64::INFINITY,
            std: f64::INFINITY,
            above_kn,
            below_kn,
        });
    }

    let alt_bias_ref = below.first().map(|s| s.feerate).unwrap_or(FeeRate::ZERO);

    let mut bootstrap_sfrs = Vec::with_capacity(num_bootstrap);
    for _ in 0..num_bootstrap {
        let mut sample: Vec<FeeStat> = (0..sorted_desc.len())
            .map(|_| sorted_desc[rng.gen_range(0..sorted_desc.len())])
            .collect();
        sample.sort_by(|a, b| b.feerate.cmp(&a.feerate));
        bootstrap_sfrs.push(calc_min_feerate_single(&sample));
    }

    let finite_samples: Vec<f64> = bootstrap_sfrs.iter().map(|f| f.to_f64_lossy()).collect();
    let mean = finite_samples.iter().sum::<f64>() / finite_samples.len() as f64;
    let variance = finite_samples
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / (finite_samples.len() as f64 - 1.0).max(1.0);
    let std = variance.sqrt();

    let sfr_f = sfr.to_f64_lossy();
    let alt_f = alt_bias_ref.to_f64_lossy();
    let bias_ref = if (mean - sfr_f).abs() >= (mean - alt_f).abs() {
        sfr_f
    } else {
        alt_f
    };
    let bias = mean - bias_ref;

    Ok(StrandingEstimate {
        sfr,
        bias,
        std,
        above_kn,
        below_kn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rust_decimal::Decimal;

    fn fr(v: i64) -> FeeRate {
        FeeRate::Finite(Decimal::from(v))
    }

    #[test]
    fn empty_observations_fail() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            estimate_stranding_feerate(&[], 100, &mut rng),
            Err(Error::NoValidTransactions)
        ));
    }

    #[test]
    fn clean_separation_finds_exact_threshold() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let obs = vec![
            FeeStat { feerate: fr(5000), in_block: true },
            FeeStat { feerate: fr(4000), in_block: true },
            FeeStat { feerate: fr(3000), in_block: true },
            FeeStat { feerate: fr(2000), in_block: false },
            FeeStat { feerate: fr(1000), in_block: false },
        ];
        let est = estimate_stranding_feerate(&obs, 200, &mut rng).unwrap();
        assert_eq!(est.sfr, fr(3000));
        assert_eq!(est.above_kn, (3, 3));
        assert_eq!(est.below_kn, (2, 2));
    }

    #[test]
    fn all_out_of_block_gives_infinite_sfr() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(2);
        let obs = vec![
            FeeStat { feerate: fr(5000), in_block: false },
            FeeStat { feerate: fr(1000), in_block: false },
        ];
        let est = estimate_stranding_feerate(&obs, 50, &mut rng).unwrap();
        assert!(est.sfr.is_infinite());
        assert!(est.bias.is_infinite());
    }
}
