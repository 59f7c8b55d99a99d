use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::latency::Percentiles;
use crate::api::{HealthState, LatencyStats};
use crate::config::{params, Config};
use crate::error::AppError;
use crate::metrics::{derive_report, fee_series};
use crate::query::{CancelToken, QueryClient};
use crate::types::{FeeEarning, PoolReport, PoolVariant, QuerySpec, ResultRow, RowWarning};

#[derive(Clone)]
pub struct ApiState {
    pub client: QueryClient,
    pub cfg: Arc<Config>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    /// Fired on shutdown; aborts every in-flight execution wait.
    pub cancel: CancelToken,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/owners/:address/pools", get(get_owner_pools))
        .route("/collections/:address/pools", get(get_collection_pools))
        .route("/pools/:address/earnings", get(get_pool_earnings))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct PoolsQuery {
    pub variant: Option<PoolVariant>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct EarningsResponse {
    pub pool_address: String,
    pub series: Vec<FeeEarning>,
    pub warnings: Vec<RowWarning>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub jobs_in_flight: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub last_completed_at_ns: Option<u64>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    /// Absent until the first execution finishes.
    #[serde(flatten)]
    pub percentiles: Option<Percentiles>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_owner_pools(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(q): Query<PoolsQuery>,
) -> Result<Json<PoolReport>, AppError> {
    let spec = QuerySpec::new(state.cfg.owner_query_id).param(params::CREATOR_ADDRESS, address.trim());
    pool_report(&state, &spec, q.variant).await.map(Json)
}

async fn get_collection_pools(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(q): Query<PoolsQuery>,
) -> Result<Json<PoolReport>, AppError> {
    let spec = QuerySpec::new(state.cfg.collection_query_id)
        .param(params::NFT_CONTRACT_ADDRESS, address.trim());
    pool_report(&state, &spec, q.variant).await.map(Json)
}

async fn get_pool_earnings(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Result<Json<EarningsResponse>, AppError> {
    let pool_address = address.trim().to_string();
    let spec = QuerySpec::new(state.cfg.earnings_query_id).param(params::POOL_ADDRESS, pool_address.clone());

    let rows = execute(&state, &spec).await?;
    let (series, warnings) = fee_series(&pool_address, &rows);

    Ok(Json(EarningsResponse {
        pool_address,
        series,
        warnings,
    }))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let last = state.health.last_completed_at_ns();
    Json(HealthResponse {
        status: "ok",
        jobs_in_flight: state.health.jobs_in_flight(),
        jobs_completed: state.health.jobs_completed(),
        jobs_failed: state.health.jobs_failed(),
        last_completed_at_ns: (last > 0).then_some(last),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    Json(LatencyResponse {
        samples: state.latency.len(),
        percentiles: state.latency.percentiles(),
    })
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

async fn pool_report(
    state: &ApiState,
    spec: &QuerySpec,
    variant: Option<PoolVariant>,
) -> Result<PoolReport, AppError> {
    let rows = execute(state, spec).await?;
    let variant = variant.unwrap_or(state.cfg.default_variant);
    Ok(derive_report(&rows, variant, Utc::now()))
}

/// Run one execution with a fresh job handle, keeping health and latency
/// stats current.
async fn execute(state: &ApiState, spec: &QuerySpec) -> Result<Vec<ResultRow>, AppError> {
    let mut job = JobGuard::start(&state.health);
    let started = Instant::now();

    let res = state.client.run(spec, &state.cfg.poll, &state.cancel).await;
    match &res {
        Ok(_) => {
            job.ok = true;
            state.latency.record(started.elapsed());
        }
        Err(e) => warn!(query_id = spec.query_id(), "Query execution failed: {e}"),
    }
    res
}

/// Counts an execution as in flight until dropped. A request abandoned by its
/// client is dropped mid-wait and counted as failed.
struct JobGuard<'a> {
    health: &'a HealthState,
    ok: bool,
}

impl<'a> JobGuard<'a> {
    fn start(health: &'a HealthState) -> Self {
        health.job_started();
        Self { health, ok: false }
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.health.job_finished(self.ok, now_ns());
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
