use crate::fee::Fee;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;

/// A fee rate in satoshis per kilobyte (1000 bytes), matching the unit
/// `floor(fee * 1000 / size)` uses throughout the estimator.
///
/// `Infinite` stands for a rate above any feerate the mempool has ever
/// observed: the stranding-feerate estimator assigns it to the bottom of
/// a block when no transaction was left behind at any rate, and the
/// simulator assigns it to a mempool that drains completely within a
/// block interval. Ordinary arithmetic on `Infinite` saturates rather
/// than panicking, since callers compare feerates far more often than
/// they combine them.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub enum FeeRate {
    Finite(Decimal),
    Infinite,
}

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate::Finite(Decimal::ZERO);

    pub fn from_fee_and_size(fee: Fee, size_bytes: u64) -> Self {
        if size_bytes == 0 {
            return FeeRate::Infinite;
        }
        let rate = (fee.as_decimal() * Decimal::from(1000)) / Decimal::from(size_bytes);
        FeeRate::Finite(rate.trunc())
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, FeeRate::Infinite)
    }

    pub fn as_finite(&self) -> Option<Decimal> {
        match self {
            FeeRate::Finite(d) => Some(*d),
            FeeRate::Infinite => None,
        }
    }

    /// Returns the decimal value, mapping `Infinite` to `f64::INFINITY`,
    /// for use in statistics that tolerate unbounded values (percentile
    /// interpolation, mean feerate under light load).
    pub fn to_f64_lossy(&self) -> f64 {
        match self {
            FeeRate::Finite(d) => d.to_f64().unwrap_or(f64::MAX),
            FeeRate::Infinite => f64::INFINITY,
        }
    }
}

impl PartialEq for FeeRate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for FeeRate {}

impl PartialOrd for FeeRate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeeRate {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FeeRate::Infinite, FeeRate::Infinite) => Ordering::Equal,
            (FeeRate::Infinite, _) => Ordering::Greater,
            (_, FeeRate::Infinite) => Ordering::Less,
            (FeeRate::Finite(a), FeeRate::Finite(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeRate::Finite(d) => write!(f, "{d} sat/kB"),
            FeeRate::Infinite => write!(f, "inf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_is_greatest() {
        let a = FeeRate::Finite(Decimal::from(1_000_000));
        assert!(FeeRate::Infinite > a);
    }

    #[test]
    fn zero_size_is_infinite() {
        assert!(FeeRate::from_fee_and_size(Fee::ZERO, 0).is_infinite());
    }

    #[test]
    fn rate_truncates_to_integer_satoshis() {
        let fee = Fee::from_sat(Decimal::from(999)).unwrap();
        let rate = FeeRate::from_fee_and_size(fee, 1000);
        assert_eq!(rate.as_finite().unwrap(), Decimal::from(999));
    }

    #[test]
    fn finite_round_trips_through_json() {
        let rate = FeeRate::Finite(Decimal::from(1500));
        let json = serde_json::to_string(&rate).unwrap();
        let back: FeeRate = serde_json::from_str(&json).unwrap();
        assert_eq!(rate, back);
    }

    #[test]
    fn infinite_round_trips_through_json() {
        let json = serde_json::to_string(&FeeRate::Infinite).unwrap();
        let back: FeeRate = serde_json::from_str(&json).unwrap();
        assert!(back.is_infinite());
    }
}
