//! Shared value types used across the estimator workspace: fee and
//! feerate arithmetic, block heights, transaction ids, and the clock
//! abstraction. Kept dependency-light and free of any async runtime so
//! every other crate, including the simulator's hot loop, can depend on
//! it without cost.

pub mod fee;
pub mod feerate;
pub mod height;
pub mod time;
pub mod txid;

pub use fee::{Fee, FeeError};
pub use feerate::FeeRate;
pub use height::BlockHeight;
pub use time::{Clock, SystemClock, TimeGetter, UnixTime};
pub use txid::{TxId, TxIdParseError};
