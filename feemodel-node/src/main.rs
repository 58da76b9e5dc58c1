//! Binary entry point: loads configuration, opens the history store,
//! starts the mempool poller and the three estimation workers, and
//! serves the read-only HTTP API, in the same shape as the teacher's
//! `node` binary (`config_files` + `logging::init` + a `tokio` runtime
//! wiring up long-running workers and an `axum` server).

mod config;
mod estimate;
mod http;
mod poller;
mod pool_registry;

use anyhow::Context;
use clap::Parser;
use common::{BlockHeight, TxId, UnixTime};
use config::{Cli, NodeConfigFile};
use feemodel_core::mementry::MemEntry;
use feemodel_core::orchestrator::Orchestrator;
use feemodel_core::predict::{PredictionTracker, TxPrediction};
use feemodel_core::simul::{SimEntry, SimMempool};
use feemodel_core::transient::TransientStats;
use node_client::{NodeClient, NodeError, RawBlock, RawMempool};
use poller::MempoolTracker;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storage::SqliteHistoryStore;
use tokio::sync::Mutex as AsyncMutex;

/// A `NodeClient` that always fails. The production client (the wire
/// transport, auth, and batching to a live node's RPC surface) is an
/// external collaborator per the governing design's contract — only its
/// shape is specified — and wiring a real one needs an HTTP/RPC crate
/// this workspace doesn't carry. Swap this out for a concrete
/// implementation to point `feemodel-node` at an actual node; see
/// DESIGN.md.
struct UnimplementedNodeClient;

#[async_trait::async_trait]
impl NodeClient for UnimplementedNodeClient {
    async fn get_block_count(&self) -> Result<u32, NodeError> {
        Err(NodeError::Transport("no node client configured".into()))
    }
    async fn get_block(&self, _height: u32) -> Result<RawBlock, NodeError> {
        Err(NodeError::Transport("no node client configured".into()))
    }
    async fn poll_mempool(&self) -> Result<RawMempool, NodeError> {
        Err(NodeError::Transport("no node client configured".into()))
    }
}

fn now() -> UnixTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = NodeConfigFile::load(&cli)?;
    logging::init(&config.log_level);

    std::fs::create_dir_all(&config.datadir)
        .with_context(|| format!("failed to create datadir {:?}", config.datadir))?;
    let history: Arc<dyn feemodel_core::history::HistoryStore> =
        Arc::new(SqliteHistoryStore::open(&config.history_db_path())?);
    let registry = Arc::new(pool_registry::load(config.pool_info_path.as_deref())?);

    let orchestrator = Orchestrator::new();
    *orchestrator.prediction.lock() = Some(PredictionTracker::new(config.estimator.block_halflife));

    let tracker = Arc::new(AsyncMutex::new(MempoolTracker::new(
        UnimplementedNodeClient,
        Arc::clone(&history),
        config.estimator.blocks_to_keep,
    )));

    let estimator_config = config.estimator.clone();
    spawn_pools_worker(&orchestrator, Arc::clone(&history), Arc::clone(&registry), estimator_config.clone());
    orchestrator.spawn_steady_state_worker(estimator_config.clone(), now);
    spawn_transient_worker(&orchestrator, Arc::clone(&tracker), estimator_config.clone());

    let mempool_size = Arc::new(AtomicUsize::new(0));
    let poll_handle = spawn_poll_loop(
        Arc::clone(&orchestrator),
        Arc::clone(&tracker),
        Arc::clone(&mempool_size),
        estimator_config.poll_period,
        cli.once,
    );

    if cli.once {
        poll_handle.await.context("poll task panicked")?;
        return Ok(());
    }

    let state = http::AppState {
        orchestrator: Arc::clone(&orchestrator),
        update_period_pools: estimator_config.update_period_pools,
        update_period_transient: estimator_config.update_period_transient,
        mempool_size,
        now: Arc::new(now),
    };
    let listener = tokio::net::TcpListener::bind(config.http_bind_address)
        .await
        .with_context(|| format!("failed to bind HTTP API to {}", config.http_bind_address))?;
    tracing::info!(addr = %config.http_bind_address, "serving HTTP API");

    let server = axum::serve(listener, http::router(state));
    tokio::select! {
        result = server => result.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            orchestrator.request_stop();
        }
    }

    Ok(())
}

/// Wires the pools worker: waits until the configured trailing window of
/// history is sufficiently filled, then re-estimates pools and the
/// tx-rate source from it.
fn spawn_pools_worker(
    orchestrator: &Arc<Orchestrator>,
    history: Arc<dyn feemodel_core::history::HistoryStore>,
    registry: Arc<feemodel_core::PoolInfoRegistry>,
    config: feemodel_core::config::EstimatorConfig,
) {
    let window = config.window;
    let window_fill_thresh = config.window_fill_thresh;

    let history_for_check = Arc::clone(&history);
    let window_filled = move || {
        let Some(tip) = latest_height(history_for_check.as_ref()) else {
            return false;
        };
        let start = BlockHeight::new(tip.as_u32().saturating_sub(window));
        estimate::window_fill_ratio(history_for_check.as_ref(), start, tip) >= window_fill_thresh
    };

    orchestrator.spawn_pools_worker(
        config.clone(),
        window_filled,
        move || {
            let history = Arc::clone(&history);
            let registry = Arc::clone(&registry);
            let config = config.clone();
            async move {
                let tip = latest_height(history.as_ref())
                    .ok_or_else(|| feemodel_core::Error::BlockRangeEmpty(BlockHeight::new(0), BlockHeight::new(0)))?;
                let start = BlockHeight::new(tip.as_u32().saturating_sub(config.window));
                let mut rng = ChaCha8Rng::from_entropy();
                // Coinbase addresses/tags come from the node at block-fetch
                // time, not from the history store; with no live node
                // configured every block misses here and falls back to
                // `PoolsEstimator`'s unknown-pool grouping.
                estimate::estimate_pools_and_tx_source(history.as_ref(), start, tip, &registry, &config, |_| None, &mut rng)
            }
        },
        now,
    );
}

/// Wires the transient worker against a live snapshot of the mempool
/// tracker's currently-held entries.
fn spawn_transient_worker(
    orchestrator: &Arc<Orchestrator>,
    tracker: Arc<AsyncMutex<MempoolTracker<UnimplementedNodeClient>>>,
    config: feemodel_core::config::EstimatorConfig,
) {
    orchestrator.spawn_transient_worker(
        config,
        move || {
            let entries = tracker.try_lock().map(|t| t.current_entries()).unwrap_or_default();
            live_mempool(entries)
        },
        now,
    );
}

/// The polling loop: on each tick, folds newly-discovered blocks into
/// the history store, scores any predictions they confirmed, and
/// refreshes live predictions for the entries still sitting in the
/// mempool against the latest published transient stats.
fn spawn_poll_loop(
    orchestrator: Arc<Orchestrator>,
    tracker: Arc<AsyncMutex<MempoolTracker<UnimplementedNodeClient>>>,
    mempool_size: Arc<AtomicUsize>,
    poll_period: u64,
    once: bool,
) -> tokio::task::JoinHandle<()> {
    let stop = orchestrator.stop_flag();
    tokio::spawn(async move {
        loop {
            if stop.is_set() {
                return;
            }

            let mut guard = tracker.lock().await;
            match guard.poll_once().await {
                Ok(blocks) => {
                    if !blocks.is_empty() {
                        let mut prediction = orchestrator.prediction.lock();
                        if let Some(tracker) = prediction.as_mut() {
                            tracker.process_blocks(&blocks);
                        }
                    }
                    let entries = guard.current_entries();
                    mempool_size.store(entries.len(), Ordering::Relaxed);
                    if let Some((stats, _)) = orchestrator.transient.get() {
                        let predictions = build_predictions(&entries, &stats, now());
                        let mut prediction = orchestrator.prediction.lock();
                        if let Some(tracker) = prediction.as_mut() {
                            tracker.update_predictions(predictions.into_iter());
                        }
                    }
                }
                Err(err) => tracing::warn!(error = %err, "mempool poll failed"),
            }
            drop(guard);

            if once {
                return;
            }
            tokio::time::sleep(Duration::from_secs(poll_period)).await;
        }
    })
}

fn latest_height(history: &dyn feemodel_core::history::HistoryStore) -> Option<BlockHeight> {
    history.list_heights(None).ok().and_then(|hs| hs.last().copied())
}

/// Freezes a `TxPrediction` for every live mempool entry, reading its
/// expected/percentile waits off the transient survival curves at that
/// entry's own feerate.
fn build_predictions(
    entries: &[(TxId, MemEntry)],
    stats: &TransientStats,
    now: UnixTime,
) -> Vec<(TxId, TxPrediction)> {
    entries
        .iter()
        .map(|(txid, entry)| {
            let feerate = entry.feerate().to_f64_lossy();
            let expected_wait = stats.expected_waits.call(feerate);
            let percentile_waits = stats
                .percentile_waits
                .iter()
                .map(|(p, wf)| (*p as f64 / 100.0, wf.call(feerate)))
                .collect();
            let entry_time = entry.time().min(now);
            (*txid, TxPrediction::new(entry_time, expected_wait, percentile_waits))
        })
        .collect()
}

/// Builds the simulator's `SimMempool` snapshot from the tracker's live
/// entries. An empty entry set is always a valid `SimMempool`.
fn live_mempool(entries: Vec<(TxId, MemEntry)>) -> SimMempool {
    let mut map = BTreeMap::new();
    for (txid, entry) in entries {
        let sim_entry = SimEntry::new(entry.feerate(), entry.size()).with_depends(entry.depends().clone());
        map.insert(txid, sim_entry);
    }
    SimMempool::new(map).unwrap_or_else(|_| SimMempool::new(BTreeMap::new()).expect("empty mempool is always valid"))
}
