pub mod config;
pub mod error;
pub mod history;
pub mod memblock;
pub mod mementry;
pub mod orchestrator;
pub mod pool_estimator;
pub mod pools;
pub mod predict;
pub mod simul;
pub mod steadystate;
pub mod stranding;
pub mod transient;
pub mod txsource;

pub use error::{Error, Result, StorageError};
pub use history::HistoryStore;
pub use memblock::MemBlock;
pub use mementry::{ConfirmationOutcome, MemEntry, MemEntryError};
pub use pool_estimator::{CoinbaseInfo, PoolEstimate, PoolInfoRegistry, PoolsEstimator};
pub use pools::{Capacity, SimPool, SimPools, SimPoolsError};
pub use predict::{PredictionState, PredictionTracker, TxPrediction};
pub use simul::{IncludedTx, SimBlock, SimEntry, SimMempool, SimRun, Simul};
pub use steadystate::{QueueStats, SteadyStateEstimate};
pub use stranding::{FeeStat, StrandingEstimate};
pub use transient::{TransientStats, WaitFn};
pub use txsource::{SimTx, TxSource};
