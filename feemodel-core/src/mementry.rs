use common::{BlockHeight, Fee, FeeRate, TxId};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

/// Outcome of a confirmed transaction, recorded onto its `MemEntry` once
/// the block that confirmed it (or conflicted with it) is known. Either
/// all three fields are present or none are, per the data model
/// invariant: a transaction either confirmed or it didn't, there is no
/// partial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConfirmationOutcome {
    pub lead_time: u64,
    pub in_block: bool,
    pub is_conflict: bool,
}

/// An immutable record of one mempool transaction at a snapshot moment.
///
/// `feerate` is derived rather than stored independently, so it can
/// never drift out of sync with `fee`/`size`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemEntry {
    txid: TxId,
    size: u64,
    fee: Fee,
    start_priority: Decimal,
    curr_priority: Decimal,
    time: u64,
    height: BlockHeight,
    depends: BTreeSet<TxId>,
    outcome: Option<ConfirmationOutcome>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemEntryError {
    #[error("mempool entry size must be positive")]
    ZeroSize,
}

impl MemEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        txid: TxId,
        size: u64,
        fee: Fee,
        start_priority: Decimal,
        curr_priority: Decimal,
        time: u64,
        height: BlockHeight,
        depends: BTreeSet<TxId>,
    ) -> Result<Self, MemEntryError> {
        utils::ensure!(size != 0, MemEntryError::ZeroSize);
        Ok(MemEntry {
            txid,
            size,
            fee,
            start_priority,
            curr_priority,
            time,
            height,
            depends,
            outcome: None,
        })
    }

    pub fn txid(&self) -> TxId {
        self.txid
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn fee(&self) -> Fee {
        self.fee
    }

    pub fn feerate(&self) -> FeeRate {
        FeeRate::from_fee_and_size(self.fee, self.size)
    }

    pub fn start_priority(&self) -> Decimal {
        self.start_priority
    }

    pub fn curr_priority(&self) -> Decimal {
        self.curr_priority
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    pub fn depends(&self) -> &BTreeSet<TxId> {
        &self.depends
    }

    pub fn outcome(&self) -> Option<ConfirmationOutcome> {
        self.outcome
    }

    pub fn with_outcome(mut self, outcome: ConfirmationOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// The `is_high_priority` heuristic from the original fee estimator:
    /// an entry is treated as "free" (not bound by the feerate policy) if
    /// its current priority clears a threshold the node otherwise uses to
    /// waive the relay fee, or if its feerate already falls below the
    /// relay minimum (so it says nothing about a pool's real policy
    /// either way). The node's current-height priority undercounts true
    /// mining priority, so this stays an approximation of the original.
    pub fn is_high_priority(&self, priority_thresh: Decimal, min_relay_txfee: FeeRate) -> bool {
        self.curr_priority >= priority_thresh || self.feerate() < min_relay_txfee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Fee;

    fn entry(size: u64, fee_sat: i64) -> MemEntry {
        MemEntry::new(
            TxId::from_bytes([1u8; 32]),
            size,
            Fee::from_sat(Decimal::from(fee_sat)).unwrap(),
            Decimal::ZERO,
            Decimal::ZERO,
            1_000,
            BlockHeight::new(100),
            BTreeSet::new(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_zero_size() {
        let err = MemEntry::new(
            TxId::from_bytes([0u8; 32]),
            0,
            Fee::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            0,
            BlockHeight::new(0),
            BTreeSet::new(),
        )
        .unwrap_err();
        assert_eq!(err, MemEntryError::ZeroSize);
    }

    #[test]
    fn feerate_floors_to_integer_satoshi_per_kb() {
        let e = entry(250, 999);
        assert_eq!(e.feerate().as_finite().unwrap(), Decimal::from(3996));
    }

    #[test]
    fn high_priority_threshold() {
        let mut e = entry(250, 100);
        e.curr_priority = Decimal::from(1000);
        assert!(e.is_high_priority(Decimal::from(500), FeeRate::ZERO));
        assert!(!e.is_high_priority(Decimal::from(5000), FeeRate::ZERO));
    }

    #[test]
    fn below_relay_minimum_counts_as_high_priority() {
        let e = entry(250, 100);
        assert!(e.is_high_priority(Decimal::from(u64::MAX), FeeRate::Finite(Decimal::from(1000))));
        assert!(!e.is_high_priority(Decimal::from(u64::MAX), FeeRate::Finite(Decimal::from(100))));
    }
}
