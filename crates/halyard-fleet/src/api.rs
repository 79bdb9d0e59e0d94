//! HTTP API for workers and operators.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::cache::ProgramCache;
use crate::dispatch::{Assignment, Dispatcher};
use crate::domain::DomainRegistry;
use crate::error::{FleetError, FleetResult};
use crate::registry::{Worker, WorkerRegistry};
use crate::report::ErrorReporter;
use crate::types::ProgramEntry;

/// Shared application state.
pub struct AppState {
    pub workers: Arc<WorkerRegistry>,
    pub domains: Arc<DomainRegistry>,
    pub cache: Arc<ProgramCache>,
    pub dispatcher: Dispatcher,
    pub reporter: ErrorReporter,
    /// Liveness timeout for registrations that do not name one.
    pub default_timeout: Duration,
}

/// Creates the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Workers
        .route("/workers", get(list_workers).post(register_worker))
        .route("/workers/{id}", get(get_worker).delete(remove_worker))
        .route("/workers/{id}/heartbeat", put(heartbeat))
        .route("/workers/{id}/complete", post(complete))
        // Dispatch
        .route("/dispatch/{language}", get(select_worker))
        .route("/assignments", post(assign))
        // Domains and programs
        .route("/domains", get(list_domains))
        .route("/programs/{domain}/{id}", get(get_program))
        .route("/metrics", get(metrics))
        .with_state(state)
}

impl FleetError {
    /// HTTP status for this error.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::WorkerNotFound(_) | Self::DomainNotFound(_) | Self::ProgramNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::ProgramNotExecutable { .. } => StatusCode::CONFLICT,
            Self::DispatchUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Connection { .. } => StatusCode::BAD_GATEWAY,
            Self::Config(_)
            | Self::Database(_)
            | Self::Watch(_)
            | Self::Io(_)
            | Self::Serialisation(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            warn!(error = %self, "Request failed");
            "Internal server error".to_owned()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        workers: state.workers.len(),
        domains: state.domains.len(),
        programs: state.cache.len(),
    })
}

async fn list_workers(State(state): State<Arc<AppState>>) -> Json<Vec<WorkerResponse>> {
    let workers = state.workers.list_all();
    Json(workers.into_iter().map(WorkerResponse::from).collect())
}

/// Register (or re-register) a worker.
async fn register_worker(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterWorkerRequest>,
) -> FleetResult<(StatusCode, Json<WorkerResponse>)> {
    if request.id.trim().is_empty() {
        return Err(FleetError::InvalidRequest("worker id must not be empty".into()));
    }
    if request.uri.trim().is_empty() {
        return Err(FleetError::InvalidRequest("worker uri must not be empty".into()));
    }

    let timeout = match request.timeout_secs {
        Some(0) => {
            return Err(FleetError::InvalidRequest("timeout_secs must be non-zero".into()));
        }
        Some(secs) => Duration::from_secs(secs),
        None => state.default_timeout,
    };

    let worker = state
        .workers
        .register(request.id, request.uri, request.languages, timeout);
    Ok((StatusCode::CREATED, Json(WorkerResponse::from(worker))))
}

async fn get_worker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> FleetResult<Json<WorkerResponse>> {
    state
        .workers
        .get(&id)
        .map(|w| Json(WorkerResponse::from(w)))
        .ok_or(FleetError::WorkerNotFound(id))
}

async fn remove_worker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> FleetResult<StatusCode> {
    state.workers.deregister(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Refresh a worker's liveness. Unknown workers get 404 and must re-register.
async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> FleetResult<StatusCode> {
    state.workers.report_heartbeat(&id, request.load)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> FleetResult<Json<LoadResponse>> {
    let load = state.dispatcher.complete(&id)?;
    Ok(Json(LoadResponse { worker_id: id, load }))
}

/// Pick a worker for a language without charging it.
async fn select_worker(
    State(state): State<Arc<AppState>>,
    Path(language): Path<String>,
) -> FleetResult<Json<WorkerResponse>> {
    let worker = state.workers.select_for_dispatch(&language)?;
    Ok(Json(WorkerResponse::from(worker)))
}

async fn assign(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AssignRequest>,
) -> FleetResult<Json<Assignment>> {
    state
        .dispatcher
        .assign(&request.domain, request.program)
        .map(Json)
}

async fn list_domains(State(state): State<Arc<AppState>>) -> Json<Vec<DomainResponse>> {
    let snapshot = state.cache.snapshot();
    let domains = state
        .domains
        .list_domains()
        .into_iter()
        .map(|name| {
            let cached = snapshot.domain(&name);
            DomainResponse {
                programs: cached.map_or(0, |d| d.programs.len()),
                refreshed_at: cached.map(|d| d.refreshed_at.to_rfc3339()),
                name,
            }
        })
        .collect();
    Json(domains)
}

async fn get_program(
    State(state): State<Arc<AppState>>,
    Path((domain, id)): Path<(String, Uuid)>,
) -> FleetResult<Json<ProgramEntry>> {
    state.cache.lookup(&domain, id).map(Json)
}

/// Prometheus text exposition.
async fn metrics(State(state): State<Arc<AppState>>) -> String {
    let workers = state.workers.list_all();
    let alive = workers.iter().filter(|w| w.alive()).count();
    let snapshot = state.cache.snapshot();

    format!(
        "# HELP fleet_workers_total Registered workers\n\
         # TYPE fleet_workers_total gauge\n\
         fleet_workers_total {}\n\n\
         # HELP fleet_workers_alive Workers within their liveness deadline\n\
         # TYPE fleet_workers_alive gauge\n\
         fleet_workers_alive {}\n\n\
         # HELP fleet_load_total Outstanding load across all workers\n\
         # TYPE fleet_load_total gauge\n\
         fleet_load_total {}\n\n\
         # HELP fleet_domains_total Active domains\n\
         # TYPE fleet_domains_total gauge\n\
         fleet_domains_total {}\n\n\
         # HELP fleet_programs_cached Programs in the cache\n\
         # TYPE fleet_programs_cached gauge\n\
         fleet_programs_cached {}\n\n\
         # HELP fleet_cache_generation Program cache refresh generation\n\
         # TYPE fleet_cache_generation counter\n\
         fleet_cache_generation {}\n\n\
         # HELP fleet_errors_dropped_total Errors dropped because the error channel was full\n\
         # TYPE fleet_errors_dropped_total counter\n\
         fleet_errors_dropped_total {}\n",
        workers.len(),
        alive,
        state.workers.total_load(),
        state.domains.len(),
        snapshot.len(),
        snapshot.generation,
        state.reporter.dropped(),
    )
}

// Request types

#[derive(Debug, Deserialize)]
pub struct RegisterWorkerRequest {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub load: u64,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub domain: String,
    pub program: Uuid,
}

// Response types

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    workers: usize,
    domains: usize,
    programs: usize,
}

#[derive(Debug, Serialize)]
pub struct WorkerResponse {
    pub id: String,
    pub uri: String,
    pub languages: Vec<String>,
    pub load: u64,
    pub alive: bool,
    pub timeout_secs: u64,
    pub registered_at_secs_ago: u64,
    pub last_seen_secs_ago: u64,
}

impl From<Worker> for WorkerResponse {
    fn from(w: Worker) -> Self {
        Self {
            alive: w.alive(),
            load: w.load(),
            timeout_secs: w.timeout().as_secs(),
            registered_at_secs_ago: w.registered_at().elapsed().as_secs(),
            last_seen_secs_ago: w.last_seen().elapsed().as_secs(),
            languages: w.languages.into_iter().collect(),
            id: w.id,
            uri: w.uri,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoadResponse {
    pub worker_id: String,
    pub load: u64,
}

#[derive(Debug, Serialize)]
pub struct DomainResponse {
    pub name: String,
    pub programs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<String>,
}
