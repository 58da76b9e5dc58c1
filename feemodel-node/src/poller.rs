//! The mempool tracker: the "external collaborator" from §2 that turns
//! raw `NodeClient` polls into the finished `MemBlock` records the
//! estimation engine consumes. Per the governing design this component
//! is out of the core contract — only the `MemBlock`/`HistoryStore`
//! shapes it must produce are specified — so this is a thin, direct
//! implementation rather than an optimized one.

use common::{BlockHeight, Fee, TxId};
use feemodel_core::history::HistoryStore;
use feemodel_core::mementry::{ConfirmationOutcome, MemEntry};
use feemodel_core::MemBlock;
use node_client::{NodeClient, RawMempool, RawMempoolEntry};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Polls the node for its current mempool and chain tip, and whenever
/// the tip has advanced, folds the previously-held mempool snapshot
/// into one `MemBlock` per newly-discovered block and writes it to the
/// history store.
pub struct MempoolTracker<N> {
    node: N,
    history: Arc<dyn HistoryStore>,
    retention: u32,
    last_tip: Option<u32>,
    last_mempool: Option<RawMempool>,
}

impl<N: NodeClient> MempoolTracker<N> {
    pub fn new(node: N, history: Arc<dyn HistoryStore>, retention: u32) -> Self {
        MempoolTracker {
            node,
            history,
            retention,
            last_tip: None,
            last_mempool: None,
        }
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Returns the mempool entries as of the last successful poll, for
    /// the transient worker's live-snapshot input and the prediction
    /// tracker. Empty before the first poll completes.
    pub fn current_entries(&self) -> Vec<(TxId, MemEntry)> {
        let Some(mempool) = &self.last_mempool else {
            return Vec::new();
        };
        mempool
            .entries
            .iter()
            .filter_map(|(txid, raw)| raw_to_entry(*txid, raw).ok().map(|e| (*txid, e)))
            .collect()
    }

    /// One poll cycle: fetches the current chain tip and mempool, and if
    /// the tip advanced since the last cycle, records one `MemBlock` per
    /// newly-discovered block height (sharing the pre-advance mempool
    /// snapshot as their common pre-snapshot, per the data model's
    /// multi-block-per-poll lifecycle note) and returns them.
    pub async fn poll_once(&mut self) -> feemodel_core::Result<Vec<MemBlock>> {
        let tip = self.node.get_block_count().await?;
        let mempool = self.node.poll_mempool().await?;

        let mut recorded = Vec::new();
        if let (Some(last_tip), Some(pre_mempool)) = (self.last_tip, self.last_mempool.take()) {
            if tip > last_tip {
                let mut remaining: HashMap<TxId, RawMempoolEntry> = pre_mempool.entries.clone();
                for height in (last_tip + 1)..=tip {
                    let block = self.node.get_block(height).await?;
                    let included: BTreeSet<TxId> = block.txids.iter().copied().collect();

                    let mut entries = BTreeMap::new();
                    for (txid, raw) in &remaining {
                        let Ok(mut entry) = raw_to_entry(*txid, raw) else {
                            continue;
                        };
                        let in_block = included.contains(txid);
                        let lead_time = block.time.saturating_sub(raw.time);
                        entry = entry.with_outcome(ConfirmationOutcome {
                            lead_time,
                            in_block,
                            // Conflict detection needs UTXO-level double-spend
                            // tracking the node-client contract does not
                            // expose; approximated as "never" here; see
                            // DESIGN.md.
                            is_conflict: false,
                        });
                        entries.insert(*txid, entry);
                    }

                    let memblock = MemBlock::new(BlockHeight::new(height), block.size, block.time, entries);
                    self.history.write(&memblock, self.retention)?;
                    recorded.push(memblock);

                    remaining.retain(|txid, _| !included.contains(txid));
                }
            } else {
                self.last_mempool = Some(pre_mempool);
            }
        }

        self.last_tip = Some(tip);
        self.last_mempool = Some(mempool);
        Ok(recorded)
    }
}

fn raw_to_entry(txid: TxId, raw: &RawMempoolEntry) -> Result<MemEntry, feemodel_core::MemEntryError> {
    let depends: BTreeSet<TxId> = raw.depends.iter().copied().collect();
    let fee = Fee::from_sat(raw.fee).unwrap_or(Fee::ZERO);
    MemEntry::new(
        txid,
        raw.size,
        fee,
        raw.start_priority,
        raw.curr_priority,
        raw.time,
        BlockHeight::new(raw.height),
        depends,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use node_client::{NodeError, RawBlock};
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    fn txid(n: u8) -> TxId {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        TxId::from_bytes(bytes)
    }

    struct FakeNode {
        tip: StdMutex<u32>,
        mempool: StdMutex<RawMempool>,
        blocks: StdMutex<HashMap<u32, RawBlock>>,
    }

    #[async_trait]
    impl NodeClient for FakeNode {
        async fn get_block_count(&self) -> Result<u32, NodeError> {
            Ok(*self.tip.lock().unwrap())
        }
        async fn get_block(&self, height: u32) -> Result<RawBlock, NodeError> {
            self.blocks
                .lock()
                .unwrap()
                .get(&height)
                .cloned()
                .ok_or_else(|| NodeError::Malformed("no such block".into()))
        }
        async fn poll_mempool(&self) -> Result<RawMempool, NodeError> {
            Ok(self.mempool.lock().unwrap().clone())
        }
    }

    fn entry(size: u64, fee: i64, height: u32, time: u64) -> RawMempoolEntry {
        RawMempoolEntry {
            size,
            fee: Decimal::from(fee),
            start_priority: Decimal::ZERO,
            curr_priority: Decimal::ZERO,
            time,
            height,
            depends: Vec::new(),
        }
    }

    #[tokio::test]
    async fn records_one_memblock_per_new_block() {
        let mut entries = HashMap::new();
        entries.insert(txid(1), entry(250, 10_000, 100, 1_000));
        entries.insert(txid(2), entry(250, 1_000, 100, 1_000));

        let node = FakeNode {
            tip: StdMutex::new(100),
            mempool: StdMutex::new(RawMempool { height: 100, entries }),
            blocks: StdMutex::new(HashMap::new()),
        };
        let history: Arc<dyn HistoryStore> = Arc::new(storage::SqliteHistoryStore::in_memory().unwrap());
        let mut tracker = MempoolTracker::new(node, history, 2016);

        // First poll only establishes the baseline; no block has advanced yet.
        let recorded = tracker.poll_once().await.unwrap();
        assert!(recorded.is_empty());

        tracker.node.blocks.lock().unwrap().insert(
            101,
            RawBlock {
                height: 101,
                size: 500,
                time: 1_600,
                coinbase_tag: Vec::new(),
                txids: vec![txid(1)],
            },
        );
        *tracker.node.tip.lock().unwrap() = 101;
        tracker.node.mempool.lock().unwrap().entries.remove(&txid(1));

        let recorded = tracker.poll_once().await.unwrap();
        assert_eq!(recorded.len(), 1);
        let block = &recorded[0];
        assert_eq!(block.block_height(), BlockHeight::new(101));
        let tx1 = block.entry(&txid(1)).unwrap();
        assert!(tx1.outcome().unwrap().in_block);
        let tx2 = block.entry(&txid(2)).unwrap();
        assert!(!tx2.outcome().unwrap().in_block);
    }
}
