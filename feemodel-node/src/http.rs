//! The read-only HTTP API named in §6: `pools`, `transient`, `mempool`,
//! `prediction`, `txrate`, `estimatefee/{conftime_seconds}`, and a
//! GET/PUT `loglevel` resource. Intentionally thin — no auth, no
//! pagination, no versioning — since it sits outside the core contract.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use common::UnixTime;
use feemodel_core::orchestrator::Orchestrator;
use feemodel_core::{SimPools, TransientStats, TxSource};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub update_period_pools: u64,
    pub update_period_transient: u64,
    pub mempool_size: Arc<AtomicUsize>,
    pub now: Arc<dyn Fn() -> UnixTime + Send + Sync>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/feemodel/pools", get(pools))
        .route("/feemodel/transient", get(transient))
        .route("/feemodel/mempool", get(mempool))
        .route("/feemodel/prediction", get(prediction))
        .route("/feemodel/txrate", get(txrate))
        .route("/feemodel/estimatefee/:conftime_seconds", get(estimatefee))
        .route("/feemodel/loglevel", get(get_loglevel).put(set_loglevel))
        .with_state(state)
}

#[derive(Serialize)]
struct Snapshot<T: Serialize> {
    updated_at: UnixTime,
    stale: bool,
    #[serde(flatten)]
    data: T,
}

fn snapshot<T: Serialize>(data: T, updated_at: UnixTime, now: UnixTime, update_period: u64) -> Json<Snapshot<T>> {
    Json(Snapshot {
        updated_at,
        stale: now.saturating_sub(updated_at) > 2 * update_period,
        data,
    })
}

async fn pools(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.pools.get() {
        Some((pools, updated_at)) => {
            let view: &SimPools = &pools;
            snapshot(view, updated_at, (state.now)(), state.update_period_pools).into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "pools not yet estimated").into_response(),
    }
}

#[derive(Serialize)]
struct TxRateView {
    tx_rate: f64,
    sample_size: usize,
}

async fn txrate(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.tx_source.get() {
        Some((source, updated_at)) => {
            let view: &TxSource = &source;
            let dto = TxRateView {
                tx_rate: view.tx_rate(),
                sample_size: view.sample().len(),
            };
            snapshot(dto, updated_at, (state.now)(), state.update_period_pools).into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "tx rate not yet estimated").into_response(),
    }
}

#[derive(Serialize)]
struct TransientView {
    feerates: Vec<f64>,
    expected_waits: Vec<f64>,
    percentile_waits: BTreeMap<u32, Vec<f64>>,
    num_iters: usize,
}

async fn transient(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.transient.get() {
        Some((stats, updated_at)) => {
            let view: &TransientStats = &stats;
            let feerates: Vec<f64> = view.feerates.iter().map(|f| f.to_f64_lossy()).collect();
            let dto = TransientView {
                expected_waits: feerates.iter().map(|f| view.expected_waits.call(*f)).collect(),
                percentile_waits: view
                    .percentile_waits
                    .iter()
                    .map(|(p, wf)| (*p, feerates.iter().map(|f| wf.call(*f)).collect()))
                    .collect(),
                feerates,
                num_iters: view.num_iters,
            };
            snapshot(dto, updated_at, (state.now)(), state.update_period_transient).into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "transient stats not yet estimated").into_response(),
    }
}

#[derive(Serialize)]
struct MempoolView {
    tracked_entries: usize,
}

async fn mempool(State(state): State<AppState>) -> impl IntoResponse {
    Json(MempoolView {
        tracked_entries: state.mempool_size.load(Ordering::Relaxed),
    })
}

#[derive(Serialize)]
struct PredictionView {
    tracked: usize,
    score: Option<f64>,
}

async fn prediction(State(state): State<AppState>) -> impl IntoResponse {
    let guard = state.orchestrator.prediction.lock();
    match guard.as_ref() {
        Some(tracker) => Json(PredictionView {
            tracked: tracker.len(),
            score: tracker.score(),
        })
        .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "prediction tracker not yet started").into_response(),
    }
}

async fn estimatefee(State(state): State<AppState>, Path(conftime_seconds): Path<u64>) -> impl IntoResponse {
    match state.orchestrator.transient.get() {
        Some((stats, updated_at)) => {
            let view: &TransientStats = &stats;
            let feerate = view.expected_waits.inv(conftime_seconds as f64);
            snapshot(
                serde_json::json!({ "feerate": feerate }),
                updated_at,
                (state.now)(),
                state.update_period_transient,
            )
            .into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "transient stats not yet estimated").into_response(),
    }
}

#[derive(Serialize)]
struct LogLevelView {
    level: Option<String>,
}

async fn get_loglevel() -> impl IntoResponse {
    Json(LogLevelView {
        level: logging::current_level(),
    })
}

#[derive(serde::Deserialize)]
struct SetLogLevel {
    level: String,
}

async fn set_loglevel(Json(body): Json<SetLogLevel>) -> impl IntoResponse {
    match logging::set_level(&body.level) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err).into_response(),
    }
}
