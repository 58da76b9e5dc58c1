use crate::error::Result;
use crate::memblock::MemBlock;
use common::BlockHeight;
use std::ops::Range;

/// Persistent log of per-block mempool snapshots. Implemented against
/// the two-relation schema (`blocks`, `txs`) by the `storage` crate; kept
/// here (rather than in `storage`) since the orchestrator needs the
/// contract without depending on a concrete backend.
pub trait HistoryStore: Send + Sync {
    /// Appends `block`, then prunes anything older than `retention`
    /// blocks in the same transaction.
    fn write(&self, block: &MemBlock, retention: u32) -> Result<()>;

    fn read(&self, height: BlockHeight) -> Result<Option<MemBlock>>;

    /// Heights present in the store, optionally restricted to `range`,
    /// ascending.
    fn list_heights(&self, range: Option<Range<BlockHeight>>) -> Result<Vec<BlockHeight>>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// In-memory `HistoryStore` for tests that don't want a real sqlite
    /// file on disk.
    #[derive(Default)]
    pub struct MockHistoryStore {
        blocks: Mutex<BTreeMap<BlockHeight, MemBlock>>,
    }

    impl HistoryStore for MockHistoryStore {
        fn write(&self, block: &MemBlock, retention: u32) -> Result<()> {
            let mut guard = self.blocks.lock();
            guard.insert(block.height(), block.clone());
            while guard.len() > retention as usize {
                let oldest = *guard.keys().next().unwrap();
                guard.remove(&oldest);
            }
            Ok(())
        }

        fn read(&self, height: BlockHeight) -> Result<Option<MemBlock>> {
            Ok(self.blocks.lock().get(&height).cloned())
        }

        fn list_heights(&self, range: Option<Range<BlockHeight>>) -> Result<Vec<BlockHeight>> {
            let guard = self.blocks.lock();
            Ok(match range {
                Some(r) => guard.keys().filter(|h| r.contains(h)).copied().collect(),
                None => guard.keys().copied().collect(),
            })
        }
    }

    #[test]
    fn write_prunes_to_retention() {
        let store = MockHistoryStore::default();
        for h in 0..5u32 {
            let block = MemBlock::new(BlockHeight::new(h + 1), 1000, 0, Default::default());
            store.write(&block, 3).unwrap();
        }
        assert_eq!(store.list_heights(None).unwrap().len(), 3);
    }
}
