use common::{BlockHeight, FeeRate};

/// Errors surfaced by the estimation and simulation engine. Kept as one
/// enum (mirroring the teacher's single `mempool::error::Error`) since
/// every worker in the orchestrator needs to match on all of these at
/// its boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node error: {0}")]
    Node(#[from] node_client::NodeError),

    #[error("history store is missing a required block at height {0}")]
    HistoryMissing(BlockHeight),

    #[error("history store error: {0}")]
    Storage(#[from] StorageError),

    #[error("stopped")]
    Stopped,

    #[error("capacity is unstable at feerate {0}: demand exceeds supply")]
    Unstable(FeeRate),

    #[error("no valid transactions in the filtered sample")]
    NoValidTransactions,

    #[error("reservoir sample is empty but tx_rate > 0")]
    EmptySample,

    #[error("block range [{0}, {1}) is empty or invalid")]
    BlockRangeEmpty(BlockHeight, BlockHeight),

    #[error("bad block range: {0}")]
    BadBlockRange(String),

    #[error("pool set error: {0}")]
    Pools(#[from] crate::pools::SimPoolsError),
}

impl From<utils::Stopped> for Error {
    fn from(_: utils::Stopped) -> Self {
        Error::Stopped
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(String),
    #[error("decode error reading history record: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
