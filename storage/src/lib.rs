//! `rusqlite`-backed implementation of the `HistoryStore` contract
//! (`feemodel_core::HistoryStore`), persisting the two-relation schema
//! from the governing design's external-interfaces section: `blocks`
//! and `txs`.
//!
//! Kept as its own crate, the way the teacher workspace separates
//! `storage-sqlite` from the trait it implements, so the estimator
//! crate never has to link against `rusqlite` directly.

use common::{BlockHeight, Fee, FeeRate, TxId};
use feemodel_core::history::HistoryStore;
use feemodel_core::mementry::{ConfirmationOutcome, MemEntry};
use feemodel_core::{MemBlock, StorageError};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;

type Result<T> = std::result::Result<T, StorageError>;

/// The mempool history store is accessed under a process-wide coarse
/// lock, per §5: the storage engine (a single sqlite connection) is not
/// safe for concurrent writers, so every access serializes through this
/// mutex rather than opening one connection per caller.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS blocks (
    block_height INTEGER PRIMARY KEY,
    height       INTEGER NOT NULL,
    size         INTEGER NOT NULL,
    time         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_blocks_height ON blocks(height);

CREATE TABLE IF NOT EXISTS txs (
    block_height  INTEGER NOT NULL,
    txid          TEXT NOT NULL,
    size          INTEGER NOT NULL,
    fee           TEXT NOT NULL,
    start_priority TEXT NOT NULL,
    curr_priority TEXT NOT NULL,
    time          INTEGER NOT NULL,
    height        INTEGER NOT NULL,
    depends       TEXT NOT NULL,
    feerate       TEXT NOT NULL,
    lead_time     INTEGER,
    is_conflict   INTEGER,
    in_block      INTEGER,
    PRIMARY KEY (block_height, txid)
);
CREATE INDEX IF NOT EXISTS idx_txs_block_height ON txs(block_height);
CREATE INDEX IF NOT EXISTS idx_txs_height ON txs(height);
";

impl SqliteHistoryStore {
    /// Opens (creating if necessary) the sqlite file at `path` and
    /// applies the schema. `path` of `:memory:` opens a private
    /// in-memory database, handy for tests that want real SQL behaviour
    /// without a file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| StorageError::Sqlite(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Sqlite(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StorageError::Sqlite(e.to_string()))?;
        Ok(SqliteHistoryStore { conn: Mutex::new(conn) })
    }

    /// `blocks.height` is the pre-block chain tip (`MemBlock::height`);
    /// it is not unique on its own because, per the data-model lifecycle
    /// note, several blocks discovered within one poll interval share a
    /// single pre-snapshot and so the same `height`. `block_height` is
    /// used as the actual primary key instead — see `DESIGN.md` for the
    /// resolution of this schema ambiguity.
    fn write_locked(conn: &mut Connection, block: &MemBlock, retention: u32) -> Result<()> {
        let tx = conn.transaction().map_err(|e| StorageError::Sqlite(e.to_string()))?;
        tx.execute(
            "INSERT OR REPLACE INTO blocks (block_height, height, size, time) VALUES (?1, ?2, ?3, ?4)",
            params![
                block.block_height().as_u32(),
                block.height().as_u32(),
                block.block_size(),
                block.time(),
            ],
        )
        .map_err(|e| StorageError::Sqlite(e.to_string()))?;
        tx.execute(
            "DELETE FROM txs WHERE block_height = ?1",
            params![block.block_height().as_u32()],
        )
        .map_err(|e| StorageError::Sqlite(e.to_string()))?;

        for (txid, entry) in block.entries() {
            let depends: Vec<String> = entry.depends().iter().map(|d| d.to_string()).collect();
            let (lead_time, is_conflict, in_block) = match entry.outcome() {
                Some(o) => (Some(o.lead_time as i64), Some(o.is_conflict), Some(o.in_block)),
                None => (None, None, None),
            };
            tx.execute(
                "INSERT INTO txs (block_height, txid, size, fee, start_priority, curr_priority, time, height, depends, feerate, lead_time, is_conflict, in_block)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    block.block_height().as_u32(),
                    txid.to_string(),
                    entry.size(),
                    entry.fee().as_decimal().to_string(),
                    entry.start_priority().to_string(),
                    entry.curr_priority().to_string(),
                    entry.time(),
                    entry.height().as_u32(),
                    depends.join(","),
                    feerate_to_text(entry.feerate()),
                    lead_time,
                    is_conflict,
                    in_block,
                ],
            )
            .map_err(|e| StorageError::Sqlite(e.to_string()))?;
        }

        // prune: keep only the `retention` most recent block_heights.
        tx.execute(
            "DELETE FROM txs WHERE block_height IN (
                 SELECT block_height FROM blocks
                 ORDER BY block_height DESC
                 LIMIT -1 OFFSET ?1
             )",
            params![retention],
        )
        .map_err(|e| StorageError::Sqlite(e.to_string()))?;
        tx.execute(
            "DELETE FROM blocks WHERE block_height IN (
                 SELECT block_height FROM blocks
                 ORDER BY block_height DESC
                 LIMIT -1 OFFSET ?1
             )",
            params![retention],
        )
        .map_err(|e| StorageError::Sqlite(e.to_string()))?;

        tx.commit().map_err(|e| StorageError::Sqlite(e.to_string()))
    }

    fn read_locked(conn: &Connection, height: BlockHeight) -> Result<Option<MemBlock>> {
        let row = conn
            .query_row(
                "SELECT block_height, size, time FROM blocks WHERE height = ?1 ORDER BY block_height DESC LIMIT 1",
                params![height.as_u32()],
                |r| Ok((r.get::<_, u32>(0)?, r.get::<_, u64>(1)?, r.get::<_, u64>(2)?)),
            )
            .optional()
            .map_err(|e| StorageError::Sqlite(e.to_string()))?;
        let Some((block_height, size, time)) = row else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT txid, size, fee, start_priority, curr_priority, time, height, depends, lead_time, is_conflict, in_block
                 FROM txs WHERE block_height = ?1",
            )
            .map_err(|e| StorageError::Sqlite(e.to_string()))?;
        let rows = stmt
            .query_map(params![block_height], row_to_entry)
            .map_err(|e| StorageError::Sqlite(e.to_string()))?;

        let mut entries = BTreeMap::new();
        for row in rows {
            let entry = row.map_err(|e| StorageError::Sqlite(e.to_string()))??;
            entries.insert(entry.txid(), entry);
        }

        Ok(Some(MemBlock::new(BlockHeight::new(block_height), size, time, entries)))
    }
}

fn feerate_to_text(f: FeeRate) -> String {
    match f.as_finite() {
        Some(d) => d.to_string(),
        None => "inf".to_string(),
    }
}

fn feerate_from_text(s: &str) -> std::result::Result<FeeRate, StorageError> {
    if s == "inf" {
        return Ok(FeeRate::Infinite);
    }
    Decimal::from_str(s)
        .map(FeeRate::Finite)
        .map_err(|e| StorageError::Decode(format!("bad feerate {s}: {e}")))
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<std::result::Result<MemEntry, StorageError>> {
    let txid: String = row.get(0)?;
    let size: u64 = row.get(1)?;
    let fee: String = row.get(2)?;
    let start_priority: String = row.get(3)?;
    let curr_priority: String = row.get(4)?;
    let time: u64 = row.get(5)?;
    let height: u32 = row.get(6)?;
    let depends: String = row.get(7)?;
    let lead_time: Option<i64> = row.get(8)?;
    let is_conflict: Option<bool> = row.get(9)?;
    let in_block: Option<bool> = row.get(10)?;

    Ok((|| {
        let txid = TxId::from_str(&txid).map_err(|e| StorageError::Decode(e.to_string()))?;
        let fee = Fee::from_sat(Decimal::from_str(&fee).map_err(|e| StorageError::Decode(e.to_string()))?)
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        let start_priority =
            Decimal::from_str(&start_priority).map_err(|e| StorageError::Decode(e.to_string()))?;
        let curr_priority =
            Decimal::from_str(&curr_priority).map_err(|e| StorageError::Decode(e.to_string()))?;
        let depends = if depends.is_empty() {
            Default::default()
        } else {
            depends
                .split(',')
                .map(|s| TxId::from_str(s).map_err(|e| StorageError::Decode(e.to_string())))
                .collect::<std::result::Result<_, _>>()?
        };

        let mut entry = MemEntry::new(txid, size, fee, start_priority, curr_priority, time, BlockHeight::new(height), depends)
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        if let (Some(lead_time), Some(is_conflict), Some(in_block)) = (lead_time, is_conflict, in_block) {
            entry = entry.with_outcome(ConfirmationOutcome {
                lead_time: lead_time as u64,
                in_block,
                is_conflict,
            });
        }
        Ok(entry)
    })())
}

impl HistoryStore for SqliteHistoryStore {
    fn write(&self, block: &MemBlock, retention: u32) -> feemodel_core::Result<()> {
        let mut conn = self.conn.lock();
        Self::write_locked(&mut conn, block, retention).map_err(Into::into)
    }

    fn read(&self, height: BlockHeight) -> feemodel_core::Result<Option<MemBlock>> {
        let conn = self.conn.lock();
        Self::read_locked(&conn, height).map_err(Into::into)
    }

    fn list_heights(&self, range: Option<Range<BlockHeight>>) -> feemodel_core::Result<Vec<BlockHeight>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT height FROM blocks ORDER BY height ASC")
            .map_err(|e| StorageError::Sqlite(e.to_string()))?;
        let heights: std::result::Result<Vec<u32>, rusqlite::Error> =
            stmt.query_map([], |r| r.get(0))
                .map_err(|e| StorageError::Sqlite(e.to_string()))?
                .collect();
        let heights = heights.map_err(|e| StorageError::Sqlite(e.to_string()))?;
        Ok(heights
            .into_iter()
            .map(BlockHeight::new)
            .filter(|h| range.as_ref().map_or(true, |r| r.contains(h)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feemodel_core::mementry::MemEntry;
    use std::collections::BTreeSet;

    fn entry(txid: [u8; 32], fee_sat: i64, size: u64, height: u32) -> MemEntry {
        MemEntry::new(
            TxId::from_bytes(txid),
            size,
            Fee::from_sat(Decimal::from(fee_sat)).unwrap(),
            Decimal::ZERO,
            Decimal::ZERO,
            1_700_000_000,
            BlockHeight::new(height),
            BTreeSet::new(),
        )
        .unwrap()
        .with_outcome(ConfirmationOutcome {
            lead_time: 120,
            in_block: true,
            is_conflict: false,
        })
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let mut entries = BTreeMap::new();
        let e = entry([1u8; 32], 12345, 250, 100);
        entries.insert(e.txid(), e);
        let block = MemBlock::new(BlockHeight::new(101), 500_000, 1_700_000_600, entries);

        store.write(&block, 2016).unwrap();
        let back = store.read(BlockHeight::new(100)).unwrap().unwrap();

        assert_eq!(back.block_height(), block.block_height());
        assert_eq!(back.block_size(), block.block_size());
        assert_eq!(back.entries().len(), 1);
        let back_entry = back.entry(&TxId::from_bytes([1u8; 32])).unwrap();
        assert_eq!(back_entry.fee().as_decimal(), Decimal::from(12345));
        assert_eq!(back_entry.outcome().unwrap().lead_time, 120);
    }

    #[test]
    fn write_prunes_to_retention() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        for h in 0..5u32 {
            let block = MemBlock::new(BlockHeight::new(h + 1), 1000, h as u64, BTreeMap::new());
            store.write(&block, 3).unwrap();
        }
        assert_eq!(store.list_heights(None).unwrap().len(), 3);
    }

    #[test]
    fn list_heights_filters_by_range() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        for h in 0..10u32 {
            let block = MemBlock::new(BlockHeight::new(h + 1), 1000, h as u64, BTreeMap::new());
            store.write(&block, 100).unwrap();
        }
        let heights = store
            .list_heights(Some(BlockHeight::new(2)..BlockHeight::new(5)))
            .unwrap();
        assert_eq!(heights, vec![2, 3, 4].into_iter().map(BlockHeight::new).collect::<Vec<_>>());
    }

    #[test]
    fn missing_height_reads_as_none() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        assert!(store.read(BlockHeight::new(999)).unwrap().is_none());
    }

    #[test]
    fn open_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.sqlite");

        let block = MemBlock::new(BlockHeight::new(101), 1000, 1_700_000_000, BTreeMap::new());
        {
            let store = SqliteHistoryStore::open(&path).unwrap();
            store.write(&block, 2016).unwrap();
        }

        let store = SqliteHistoryStore::open(&path).unwrap();
        let back = store.read(BlockHeight::new(100)).unwrap().unwrap();
        assert_eq!(back.block_height(), block.block_height());
    }
}
