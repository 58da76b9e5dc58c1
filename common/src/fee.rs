use rust_decimal::Decimal;
use std::fmt;

/// An absolute transaction fee, in satoshis.
///
/// Represented as an exact decimal rather than a float so that feerate
/// arithmetic (`fee * 1000 / size`) never accumulates rounding error
/// across a mempool snapshot of thousands of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Fee(Decimal);

impl Fee {
    pub const ZERO: Fee = Fee(Decimal::ZERO);

    /// Builds a fee from a satoshi amount, rejecting negative values.
    pub fn from_sat(sat: Decimal) -> Result<Self, FeeError> {
        if sat.is_sign_negative() {
            return Err(FeeError::Negative(sat));
        }
        Ok(Fee(sat))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Fee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("fee must be non-negative, got {0}")]
    Negative(Decimal),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative() {
        assert!(Fee::from_sat(Decimal::from(-1)).is_err());
    }

    #[test]
    fn accepts_zero() {
        assert_eq!(Fee::from_sat(Decimal::ZERO).unwrap(), Fee::ZERO);
    }
}
