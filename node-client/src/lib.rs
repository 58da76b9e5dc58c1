//! Contract for the upstream node RPC client. The client itself (HTTP or
//! socket transport, authentication, batching) is out of scope: this
//! crate only fixes the shape the rest of the workspace depends on, the
//! way the teacher workspace's `rpc` crate separates the wire client from
//! its consumers.

use async_trait::async_trait;
use common::TxId;
use std::collections::HashMap;

/// A raw block as reported by the node, before it is folded into a
/// `MemBlock` by matching it against the prior mempool snapshot.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub height: u32,
    pub size: u64,
    pub time: u64,
    pub coinbase_tag: Vec<u8>,
    pub txids: Vec<TxId>,
}

/// A single mempool entry as reported by the node's `getrawmempool
/// verbose` equivalent, prior to feerate derivation and dependency
/// resolution against the rest of the snapshot.
#[derive(Debug, Clone)]
pub struct RawMempoolEntry {
    pub size: u64,
    pub fee: rust_decimal::Decimal,
    pub start_priority: rust_decimal::Decimal,
    pub curr_priority: rust_decimal::Decimal,
    pub time: u64,
    pub height: u32,
    pub depends: Vec<TxId>,
}

/// A full mempool poll result: the chain tip height the poll was taken
/// against, and every entry present at that moment.
#[derive(Debug, Clone)]
pub struct RawMempool {
    pub height: u32,
    pub entries: HashMap<TxId, RawMempoolEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node RPC transport error: {0}")]
    Transport(String),
    #[error("node returned malformed data: {0}")]
    Malformed(String),
    #[error("node RPC timed out")]
    Timeout,
}

/// The upstream node collaborator, per the contract in §6 of the
/// governing design: block count, block lookup, and a batched mempool
/// poll that must observe both reads under a single id counter so the
/// height and entries are mutually consistent.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_block_count(&self) -> Result<u32, NodeError>;
    async fn get_block(&self, height: u32) -> Result<RawBlock, NodeError>;
    async fn poll_mempool(&self) -> Result<RawMempool, NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubClient {
        height: AtomicU32,
    }

    #[async_trait]
    impl NodeClient for StubClient {
        async fn get_block_count(&self) -> Result<u32, NodeError> {
            Ok(self.height.load(Ordering::SeqCst))
        }

        async fn get_block(&self, height: u32) -> Result<RawBlock, NodeError> {
            Ok(RawBlock {
                height,
                size: 0,
                time: 0,
                coinbase_tag: Vec::new(),
                txids: Vec::new(),
            })
        }

        async fn poll_mempool(&self) -> Result<RawMempool, NodeError> {
            Ok(RawMempool {
                height: self.height.load(Ordering::SeqCst),
                entries: HashMap::new(),
            })
        }
    }

    #[tokio::test]
    async fn stub_client_reports_consistent_height() {
        let client = StubClient {
            height: AtomicU32::new(100),
        };
        assert_eq!(client.get_block_count().await.unwrap(), 100);
        let poll = client.poll_mempool().await.unwrap();
        assert_eq!(poll.height, 100);
    }
}
