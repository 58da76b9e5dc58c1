use crate::config::EstimatorConfig;
use crate::error::{Error, Result};
use crate::pools::SimPools;
use crate::predict::PredictionTracker;
use crate::simul::{SimMempool, Simul};
use crate::steadystate::{self, QueueStats};
use crate::transient::{self, TransientStats};
use crate::txsource::TxSource;
use common::UnixTime;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use utils::StopFlag;

/// A published value plus the time it was produced, read by cloning the
/// `Arc` under a short-lived lock so writers never block readers for
/// longer than a pointer swap.
struct Slot<T> {
    value: Option<Arc<T>>,
    updated_at: UnixTime,
}

pub struct PublishedSlot<T> {
    inner: RwLock<Slot<T>>,
}

impl<T> Default for PublishedSlot<T> {
    fn default() -> Self {
        PublishedSlot {
            inner: RwLock::new(Slot {
                value: None,
                updated_at: 0,
            }),
        }
    }
}

impl<T> PublishedSlot<T> {
    pub fn publish(&self, value: T, now: UnixTime) {
        let mut guard = self.inner.write();
        guard.value = Some(Arc::new(value));
        guard.updated_at = now;
    }

    /// The latest value and the time it was published, if any has ever
    /// been published.
    pub fn get(&self) -> Option<(Arc<T>, UnixTime)> {
        let guard = self.inner.read();
        guard.value.clone().map(|v| (v, guard.updated_at))
    }

    /// True once a value has been published and it is older than `2 *
    /// update_period` seconds, per the staleness rule in the error
    /// handling design.
    pub fn is_stale(&self, now: UnixTime, update_period: u64) -> bool {
        match self.get() {
            Some((_, updated_at)) => now.saturating_sub(updated_at) > 2 * update_period,
            None => true,
        }
    }
}

/// Shared state published by the three background workers and consumed
/// by the HTTP API / CLI.
#[derive(Default)]
pub struct Orchestrator {
    pub pools: PublishedSlot<SimPools>,
    pub tx_source: PublishedSlot<TxSource>,
    pub steady_state: PublishedSlot<QueueStats>,
    pub transient: PublishedSlot<TransientStats>,
    pub prediction: Arc<parking_lot::Mutex<Option<PredictionTracker>>>,
    pools_updated: Notify,
    stop: StopFlag,
}

impl Orchestrator {
    pub fn new() -> Arc<Self> {
        Arc::new(Orchestrator::default())
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.set();
    }

    /// Runs `body` in a loop shaped like the teacher's
    /// stop-flag-checked-at-top, auto-restart-after-60s worker pattern:
    /// on success, sleep `period`; on `Stopped`, exit cleanly; on any
    /// other error, log and wait a 60s cooldown before retrying.
    async fn run_worker<F, Fut>(name: &'static str, stop: StopFlag, period: Duration, mut body: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            if stop.is_set() {
                tracing::info!(worker = name, "stopping");
                return;
            }
            match body().await {
                Ok(()) => {
                    tokio::time::sleep(period).await;
                }
                Err(Error::Stopped) => {
                    tracing::info!(worker = name, "stopped mid-run");
                    return;
                }
                Err(err) => {
                    tracing::warn!(worker = name, error = %err, "worker failed, cooling down");
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            }
        }
    }

    /// Spawns the pools worker: waits (polling every 10s) until the
    /// caller reports the history window is sufficiently filled, then
    /// re-estimates at most once per `update_period_pools`, publishing
    /// into `self.pools`/`self.tx_source` and notifying the steady-state
    /// worker.
    pub fn spawn_pools_worker<F, Fut>(
        self: &Arc<Self>,
        config: EstimatorConfig,
        window_filled: impl Fn() -> bool + Send + Sync + 'static,
        estimate: F,
        now: impl Fn() -> UnixTime + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(SimPools, TxSource)>> + Send,
    {
        let this = Arc::clone(self);
        let stop = this.stop.clone();
        tokio::spawn(async move {
            Self::run_worker("pools", stop.clone(), Duration::from_secs(config.update_period_pools), || {
                let this = Arc::clone(&this);
                let window_filled = &window_filled;
                let estimate = &estimate;
                let now = &now;
                async move {
                    while !window_filled() {
                        if stop.is_set() {
                            return Err(Error::Stopped);
                        }
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    let (pools, tx_source) = estimate().await?;
                    this.pools.publish(pools, now());
                    this.tx_source.publish(tx_source, now());
                    this.pools_updated.notify_waiters();
                    Ok(())
                }
            })
            .await;
        })
    }

    /// Spawns the steady-state worker: re-runs after every successful
    /// pools update.
    pub fn spawn_steady_state_worker(
        self: &Arc<Self>,
        config: EstimatorConfig,
        now: impl Fn() -> UnixTime + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let stop = this.stop.clone();
        tokio::spawn(async move {
            loop {
                if stop.is_set() {
                    return;
                }
                this.pools_updated.notified().await;
                if stop.is_set() {
                    return;
                }
                let Some((pools, _)) = this.pools.get() else { continue };
                let Some((tx_source, _)) = this.tx_source.get() else { continue };
                let sim = match Simul::new((*pools).clone(), (*tx_source).clone(), config.rate_ratio_thresh) {
                    Ok(sim) => sim,
                    Err(err) => {
                        tracing::warn!(error = %err, "steady-state: simulator setup failed");
                        continue;
                    }
                };
                let classes = match steadystate::select_feerate_classes(
                    &tx_source,
                    &sim.capacity().feerates,
                    sim.stable_feerate(),
                ) {
                    Ok(c) => c,
                    Err(err) => {
                        tracing::warn!(error = %err, "steady-state: feerate class selection failed");
                        continue;
                    }
                };
                let rng = ChaCha8Rng::from_entropy();
                match steadystate::estimate_steady_state(
                    &sim,
                    &classes,
                    config.min_iters,
                    config.max_iters,
                    config.max_time(),
                    rng,
                    &stop,
                ) {
                    Ok(stats) => this.steady_state.publish(stats, now()),
                    Err(err) => tracing::warn!(error = %err, "steady-state estimation failed"),
                }
            }
        })
    }

    /// Spawns the transient worker: re-runs every `update_period_transient`
    /// seconds against the latest published pools/tx_source pair and a
    /// live mempool snapshot supplied by `mempool_snapshot`.
    pub fn spawn_transient_worker(
        self: &Arc<Self>,
        config: EstimatorConfig,
        mempool_snapshot: impl Fn() -> SimMempool + Send + Sync + 'static,
        now: impl Fn() -> UnixTime + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let stop = this.stop.clone();
        tokio::spawn(async move {
            Self::run_worker(
                "transient",
                stop.clone(),
                Duration::from_secs(config.update_period_transient),
                || {
                    let this = Arc::clone(&this);
                    let mempool_snapshot = &mempool_snapshot;
                    let now = &now;
                    let config = &config;
                    let stop = &stop;
                    async move {
                        let Some((pools, _)) = this.pools.get() else {
                            return Ok(());
                        };
                        let Some((tx_source, _)) = this.tx_source.get() else {
                            return Ok(());
                        };
                        let sim = Simul::new((*pools).clone(), (*tx_source).clone(), config.rate_ratio_thresh)?;
                        let percentiles = transient::default_percentiles();
                        let mempool = mempool_snapshot();
                        let mut rng = ChaCha8Rng::from_entropy();
                        let stats = transient::estimate_transient_stats(
                            &sim,
                            &mempool,
                            &sim.capacity().feerates.clone(),
                            config.min_iters,
                            config.max_iters,
                            config.max_time(),
                            &percentiles,
                            &mut rng,
                            stop,
                        )?;
                        this.transient.publish(stats, now());
                        Ok(())
                    }
                },
            )
            .await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_reports_stale_before_first_publish() {
        let slot: PublishedSlot<u32> = PublishedSlot::default();
        assert!(slot.is_stale(1000, 60));
    }

    #[test]
    fn slot_reports_fresh_right_after_publish() {
        let slot = PublishedSlot::default();
        slot.publish(42u32, 1000);
        assert!(!slot.is_stale(1010, 60));
        assert!(slot.is_stale(1200, 60));
    }
}
