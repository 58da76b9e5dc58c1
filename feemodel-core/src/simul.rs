use crate::error::{Error, Result};
use crate::pools::{Capacity, SimPools};
use crate::txsource::TxSource;
use common::{FeeRate, TxId};
use rand::Rng;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One transaction tracked by the working mempool during a simulation
/// run: just enough to run the greedy inclusion rule and to resolve
/// dependency edges within a snapshot.
#[derive(Debug, Clone)]
pub struct SimEntry {
    pub feerate: FeeRate,
    pub size: u64,
    pub depends: BTreeSet<TxId>,
}

impl SimEntry {
    pub fn new(feerate: FeeRate, size: u64) -> Self {
        SimEntry {
            feerate,
            size,
            depends: BTreeSet::new(),
        }
    }

    pub fn with_depends(mut self, depends: BTreeSet<TxId>) -> Self {
        self.depends = depends;
        self
    }
}

/// A transaction reported as part of a simulated block.
#[derive(Debug, Clone, Copy)]
pub struct IncludedTx {
    pub feerate: FeeRate,
    pub size: u64,
}

/// The working set of a simulation run: independent entries (ready to
/// be considered for inclusion, ordered by feerate descending) and
/// pending entries (blocked on at least one dependency).
#[derive(Debug, Clone, Default)]
pub struct SimMempool {
    independent: BTreeMap<(Reverse<FeeRate>, TxId), u64>,
    independent_entries: HashMap<TxId, SimEntry>,
    pending: HashMap<TxId, SimEntry>,
    waiters: HashMap<TxId, Vec<TxId>>,
    next_synthetic: u64,
}

impl SimMempool {
    pub fn new(entries: BTreeMap<TxId, SimEntry>) -> Result<Self> {
        let mut mempool = SimMempool::default();
        for entry in entries.values() {
            for dep in &entry.depends {
                if !entries.contains_key(dep) {
                    return Err(Error::BadBlockRange(format!(
                        "entry depends on missing entry {dep}"
                    )));
                }
            }
        }
        for (txid, entry) in entries {
            mempool.insert(txid, entry);
        }
        Ok(mempool)
    }

    fn insert(&mut self, txid: TxId, entry: SimEntry) {
        if entry.depends.is_empty() {
            self.independent.insert((Reverse(entry.feerate), txid), entry.size);
            self.independent_entries.insert(txid, entry);
        } else {
            for dep in &entry.depends {
                self.waiters.entry(*dep).or_default().push(txid);
            }
            self.pending.insert(txid, entry);
        }
    }

    fn fresh_id(&mut self) -> TxId {
        let counter = self.next_synthetic;
        self.next_synthetic += 1;
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&counter.to_be_bytes());
        TxId::from_bytes(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.independent.is_empty() && self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.independent.len() + self.pending.len()
    }

    fn emit(&mut self, feerate: FeeRate, size: u64) {
        let id = self.fresh_id();
        self.insert(id, SimEntry::new(feerate, size));
    }

    /// Runs greedy inclusion for one block: take entries by feerate
    /// descending, skipping (and stopping at) anything below
    /// `min_feerate`, stopping once the next entry would exceed
    /// `max_block_size`. Promotes pending entries whose last dependency
    /// was just included so they are reconsidered within the same
    /// block.
    fn select_block(&mut self, min_feerate: FeeRate, max_block_size: u64) -> Vec<IncludedTx> {
        let mut included = Vec::new();
        let mut size_used = 0u64;

        loop {
            let Some((&(Reverse(feerate), txid), &size)) = self.independent.iter().next() else {
                break;
            };
            if feerate < min_feerate {
                break;
            }
            if size_used + size > max_block_size {
                break;
            }

            self.independent.remove(&(Reverse(feerate), txid));
            self.independent_entries.remove(&txid);
            size_used += size;
            included.push(IncludedTx { feerate, size });

            if let Some(waiters) = self.waiters.remove(&txid) {
                for waiter in waiters {
                    let done = {
                        let entry = self.pending.get_mut(&waiter).expect("waiter must be pending");
                        entry.depends.remove(&txid);
                        entry.depends.is_empty()
                    };
                    if done {
                        let entry = self.pending.remove(&waiter).unwrap();
                        self.independent.insert((Reverse(entry.feerate), waiter), entry.size);
                        self.independent_entries.insert(waiter, entry);
                    }
                }
            }
        }

        included
    }

    fn best_independent_feerate(&self) -> Option<FeeRate> {
        self.independent.keys().next().map(|(Reverse(f), _)| *f)
    }
}

fn plus_one(f: FeeRate) -> FeeRate {
    match f {
        FeeRate::Finite(d) => FeeRate::Finite(d + Decimal::ONE),
        FeeRate::Infinite => FeeRate::Infinite,
    }
}

/// A report of one simulated block.
#[derive(Debug, Clone)]
pub struct SimBlock {
    pub height: u64,
    pub interval: f64,
    pub size: u64,
    pub sfr: FeeRate,
    pub txs: Vec<IncludedTx>,
    pub pool_name: String,
}

/// Discrete-event block-production simulator: draws a pool and a block
/// interval, emits new transactions, and greedily selects the
/// transactions that pool would include.
pub struct Simul {
    pools: SimPools,
    tx_source: TxSource,
    capacity: Capacity,
    stable_feerate: FeeRate,
}

impl Simul {
    pub fn new(pools: SimPools, tx_source: TxSource, rate_ratio_thresh: f64) -> Result<Self> {
        let capacity = pools.capacity()?;
        let byterates = if tx_source.sample().is_empty() {
            vec![0.0; capacity.feerates.len()]
        } else {
            tx_source.byterates(&capacity.feerates)?
        };
        let stable_feerate = capacity
            .stable_feerate(&byterates, rate_ratio_thresh)
            .unwrap_or(FeeRate::Infinite);
        Ok(Simul {
            pools,
            tx_source,
            capacity,
            stable_feerate,
        })
    }

    pub fn capacity(&self) -> &Capacity {
        &self.capacity
    }

    pub fn stable_feerate(&self) -> FeeRate {
        self.stable_feerate
    }

    /// Starts a lazy, restartable run from `mempool`, rejecting new
    /// transactions below `feerate_thresh` (defaults to the stable
    /// feerate). Fails with `Unstable` if the requested threshold is
    /// below the stable feerate, since the simulation would never
    /// converge to a steady queue.
    pub fn run<'s, R: Rng>(
        &'s self,
        mempool: SimMempool,
        feerate_thresh: Option<FeeRate>,
        rng: R,
    ) -> Result<SimRun<'s, R>> {
        let thresh = feerate_thresh.unwrap_or(self.stable_feerate);
        if thresh < self.stable_feerate {
            return Err(Error::Unstable(thresh));
        }
        Ok(SimRun {
            sim: self,
            mempool,
            thresh,
            height: 0,
            rng,
        })
    }
}

pub struct SimRun<'s, R: Rng> {
    sim: &'s Simul,
    mempool: SimMempool,
    thresh: FeeRate,
    height: u64,
    rng: R,
}

impl<'s, R: Rng> SimRun<'s, R> {
    pub fn mempool(&self) -> &SimMempool {
        &self.mempool
    }

    /// Advances the simulation by one block, mutating the working
    /// mempool and returning the resulting report.
    pub fn step(&mut self) -> SimBlock {
        let tau = randomness::sample_exponential(self.sim.pools.block_rate(), &mut self.rng);
        let (pool_name, pool) = self.sim.pools.sample_pool(&mut self.rng);
        let pool_name = pool_name.to_string();
        let min_feerate = pool.min_feerate;
        let max_block_size = pool.max_block_size;

        let mean_arrivals = self.sim.tx_source.tx_rate() * tau;
        if mean_arrivals > 0.0 {
            let count = randomness::sample_poisson(mean_arrivals, &mut self.rng);
            for _ in 0..count {
                if let Some(tx) = self.sim.tx_source.draw(&mut self.rng) {
                    if tx.feerate >= self.thresh {
                        self.mempool.emit(tx.feerate, tx.size);
                    }
                }
            }
        }

        let included = self.mempool.select_block(min_feerate, max_block_size);
        let size: u64 = included.iter().map(|tx| tx.size).sum();

        let sfr = if let Some(lowest) = included.iter().map(|tx| tx.feerate).min() {
            if self.mempool.is_empty() {
                min_feerate
            } else {
                plus_one(lowest).max(min_feerate)
            }
        } else if let Some(next) = self.mempool.best_independent_feerate() {
            plus_one(next).max(min_feerate)
        } else {
            min_feerate
        };

        self.height += 1;
        SimBlock {
            height: self.height,
            interval: tau,
            size,
            sfr,
            txs: included,
            pool_name,
        }
    }
}

impl<'s, R: Rng> Iterator for SimRun<'s, R> {
    type Item = SimBlock;

    fn next(&mut self) -> Option<SimBlock> {
        Some(self.step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::SimPool;
    use crate::txsource::SimTx;
    use rand::SeedableRng;

    fn id(n: u64) -> TxId {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        TxId::from_bytes(bytes)
    }

    fn fr(v: i64) -> FeeRate {
        FeeRate::Finite(Decimal::from(v))
    }

    fn deterministic_pools() -> SimPools {
        let mut pools = BTreeMap::new();
        pools.insert("pool2".into(), SimPool::new(0.5, 1_000_000, fr(1000)));
        pools.insert("pool1".into(), SimPool::new(0.3, 750_000, fr(10000)));
        pools.insert("pool0".into(), SimPool::new(0.2, 500_000, fr(20000)));
        SimPools::new(pools, 1.0 / 600.0).unwrap()
    }

    /// Drives `SimPools::sample_pool`'s uniform draw to its top of range,
    /// so it always lands in the last (highest-hashrate, here `pool2`)
    /// interval — deterministic pool selection, mirroring the reference
    /// test harness's `PseudoPools` always handing out the biggest miner.
    struct CyclicRng {
        calls: u64,
    }
    impl rand::RngCore for CyclicRng {
        fn next_u32(&mut self) -> u32 {
            self.next_u64() as u32
        }
        fn next_u64(&mut self) -> u64 {
            self.calls += 1;
            u64::MAX
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for b in dest.iter_mut() {
                *b = 0xff;
            }
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    fn source_with_zero_rate() -> TxSource {
        TxSource::new(vec![SimTx::new(100, fr(11000))], 0.0).unwrap()
    }

    #[test]
    fn scenario_a_single_root_fills_block_exactly() {
        let pools = deterministic_pools();
        let tx_source = source_with_zero_rate();
        let sim = Simul::new(pools, tx_source, 0.9).unwrap();

        let mut entries = BTreeMap::new();
        entries.insert(id(0), SimEntry::new(fr(100000), 1_000_000));
        for i in 1..1000u64 {
            entries.insert(
                id(i),
                SimEntry::new(fr(100000), 250).with_depends(BTreeSet::from([id(0)])),
            );
        }
        let mempool = SimMempool::new(entries).unwrap();
        let mut run = sim.run(mempool, None, CyclicRng { calls: 0 }).unwrap();
        let block = run.step();

        assert_eq!(block.txs.len(), 1);
        assert_eq!(block.sfr, fr(100001));
        assert_eq!(run.mempool().len(), 999);
    }

    #[test]
    fn scenario_b_root_below_threshold_is_skipped() {
        let pools = deterministic_pools();
        let tx_source = source_with_zero_rate();
        let sim = Simul::new(pools, tx_source, 0.9).unwrap();

        let mut entries = BTreeMap::new();
        entries.insert(id(0), SimEntry::new(fr(999), 250));
        for i in 1..1000u64 {
            entries.insert(
                id(i),
                SimEntry::new(fr(100000), 250).with_depends(BTreeSet::from([id(0)])),
            );
        }
        let mempool = SimMempool::new(entries).unwrap();
        let mut run = sim.run(mempool, None, CyclicRng { calls: 0 }).unwrap();
        let block = run.step();

        assert_eq!(block.txs.len(), 0);
        assert_eq!(block.sfr, fr(1000));
        assert_eq!(run.mempool().len(), 1000);
    }

    #[test]
    fn scenario_c_size_limited_block_uses_lowest_included_feerate() {
        let pools = deterministic_pools();
        let tx_source = source_with_zero_rate();
        let sim = Simul::new(pools, tx_source, 0.9).unwrap();

        let mut entries = BTreeMap::new();
        entries.insert(id(0), SimEntry::new(fr(1000), 900_000));
        for i in 1..1000u64 {
            entries.insert(
                id(i),
                SimEntry::new(fr(100000), 250).with_depends(BTreeSet::from([id(0)])),
            );
        }
        let mempool = SimMempool::new(entries).unwrap();
        let mut run = sim.run(mempool, None, CyclicRng { calls: 0 }).unwrap();
        let block = run.step();

        assert_eq!(block.txs.len(), 401);
        assert_eq!(block.sfr, fr(1001));
        assert_eq!(run.mempool().len(), 599);
    }

    #[test]
    fn dangling_dependency_is_rejected() {
        let mut entries = BTreeMap::new();
        entries.insert(id(0), SimEntry::new(fr(1000), 250).with_depends(BTreeSet::from([id(99)])));
        assert!(SimMempool::new(entries).is_err());
    }
}
