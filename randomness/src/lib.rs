//! Randomness wrapper, kept as its own crate (as the teacher workspace
//! does) so that every other crate depends on a single audited surface
//! rather than importing `rand` directly.
//!
//! Also home to the two samplers the simulator's event loop needs: a
//! Poisson count (number of transaction arrivals in an interval) and an
//! exponential duration (time to the next block). Both are implemented
//! directly against `Rng` rather than pulled in from `rand_distr`, per
//! the algorithms named in the governing design notes: Knuth's product
//! method for small means, a normal approximation above it, with
//! `round_random` used to convert a real-valued mean into an unbiased
//! integer count.

use rand::Rng;
pub use rand::{RngCore, SeedableRng};
pub use rand_chacha::ChaCha8Rng;

/// A non-deterministic RNG seeded from the OS, for production use.
pub fn make_true_rng() -> rand::rngs::ThreadRng {
    rand::thread_rng()
}

/// A reproducible RNG for simulations and tests that must be exactly
/// repeatable given a fixed seed (see `spec.md` S1/S3-S6).
pub fn make_seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Threshold above which the Poisson sampler switches from exact
/// enumeration to a normal approximation.
const POISSON_NORMAL_APPROX_THRESHOLD: f64 = 30.0;

/// Samples from `Exponential(rate)` via inverse-CDF sampling.
///
/// `rate` is the mean number of events per unit time (e.g. `block_rate`);
/// the returned value is a duration in the same unit. Panics if `rate` is
/// not finite and positive, since an undefined capacity should be caught
/// earlier (see `Unstable`).
pub fn sample_exponential(rate: f64, rng: &mut impl Rng) -> f64 {
    debug_assert!(rate > 0.0 && rate.is_finite());
    let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    -u.ln() / rate
}

/// Samples a Poisson-distributed count with the given mean.
///
/// For small means, uses Knuth's product algorithm (exact). For means
/// above [`POISSON_NORMAL_APPROX_THRESHOLD`], uses a normal (Box-Muller)
/// approximation with `round_random` to preserve the mean exactly in
/// expectation, since the exact algorithm's expected running time is
/// linear in the mean.
pub fn sample_poisson(mean: f64, rng: &mut impl Rng) -> u64 {
    debug_assert!(mean >= 0.0);
    if mean == 0.0 {
        return 0;
    }
    if mean > POISSON_NORMAL_APPROX_THRESHOLD {
        let approx = poisson_normal_approx(mean, rng);
        return round_random(approx.max(0.0), rng);
    }

    let l = (-mean).exp();
    let mut k: u64 = 0;
    let mut p: f64 = 1.0;
    loop {
        k += 1;
        p *= rng.gen::<f64>();
        if p <= l {
            break;
        }
    }
    k - 1
}

fn poisson_normal_approx(mean: f64, rng: &mut impl Rng) -> f64 {
    let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let v: f64 = rng.gen();
    let z = (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos();
    z * mean.sqrt() + mean
}

/// Rounds `f` to `floor(f)` or `ceil(f)` at random, with probability
/// chosen so the expected value of the result equals `f` exactly.
pub fn round_random(f: f64, rng: &mut impl Rng) -> u64 {
    let base = f.floor();
    let frac = f - base;
    let bumped = rng.gen::<f64>() <= frac;
    base as u64 + u64::from(bumped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_random_converges_to_mean() {
        let mut rng = make_seeded_rng(42);
        let f = 3.25;
        let n = 200_000;
        let total: u64 = (0..n).map(|_| round_random(f, &mut rng)).sum();
        let avg = total as f64 / n as f64;
        assert!((avg - f).abs() < 0.01, "avg={avg}");
    }

    #[test]
    fn poisson_mean_matches_small() {
        let mut rng = make_seeded_rng(7);
        let mean = 2.5;
        let n = 200_000;
        let total: u64 = (0..n).map(|_| sample_poisson(mean, &mut rng)).sum();
        let avg = total as f64 / n as f64;
        assert!((avg - mean).abs() < 0.05, "avg={avg}");
    }

    #[test]
    fn poisson_mean_matches_large_approx() {
        let mut rng = make_seeded_rng(11);
        let mean = 500.0;
        let n = 50_000;
        let total: u64 = (0..n).map(|_| sample_poisson(mean, &mut rng)).sum();
        let avg = total as f64 / n as f64;
        assert!((avg - mean).abs() / mean < 0.02, "avg={avg}");
    }

    #[test]
    fn exponential_mean_matches() {
        let mut rng = make_seeded_rng(3);
        let rate = 1.0 / 600.0;
        let n = 200_000;
        let total: f64 = (0..n).map(|_| sample_exponential(rate, &mut rng)).sum();
        let avg = total / n as f64;
        assert!((avg - 1.0 / rate).abs() / (1.0 / rate) < 0.02, "avg={avg}");
    }
}
