use crate::mementry::MemEntry;
use common::{BlockHeight, TxId};
use std::collections::BTreeMap;

/// A snapshot of the mempool recorded at the moment a block was
/// discovered.
///
/// `height` is the pre-block chain tip (`block_height - 1`); the entries
/// are keyed by txid and are exactly the transactions still unconfirmed
/// immediately before `block_height` was mined.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemBlock {
    height: BlockHeight,
    block_height: BlockHeight,
    block_size: u64,
    time: u64,
    entries: BTreeMap<TxId, MemEntry>,
}

impl MemBlock {
    pub fn new(
        block_height: BlockHeight,
        block_size: u64,
        time: u64,
        entries: BTreeMap<TxId, MemEntry>,
    ) -> Self {
        MemBlock {
            height: block_height - 1,
            block_height,
            block_size,
            time,
            entries,
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    pub fn block_height(&self) -> BlockHeight {
        self.block_height
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn entries(&self) -> &BTreeMap<TxId, MemEntry> {
        &self.entries
    }

    pub fn entry(&self, txid: &TxId) -> Option<&MemEntry> {
        self.entries.get(txid)
    }

    /// Transactions that this snapshot's block went on to confirm: those
    /// whose recorded outcome has `in_block = true`.
    pub fn confirmed_txids(&self) -> impl Iterator<Item = &TxId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.outcome().is_some_and(|o| o.in_block))
            .map(|(txid, _)| txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_is_block_height_minus_one() {
        let b = MemBlock::new(BlockHeight::new(101), 500_000, 1_700_000_000, BTreeMap::new());
        assert_eq!(b.height(), BlockHeight::new(100));
        assert_eq!(b.block_height(), BlockHeight::new(101));
    }
}
