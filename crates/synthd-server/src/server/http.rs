//! The HTTP surface: router, handlers, request/response shapes, and the
//! per-job lifecycle guard.
//!
//! Handlers register a job, dispatch it, and settle counters exactly once.
//! A dropped handler future (client disconnect) is caught by [`JobGuard`],
//! which cancels the job, unregisters it, and books the abort.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use once_cell::sync::Lazy;
use rand::{SeedableRng, rngs::StdRng};
use serde::Deserialize;
use serde_json::{Value, json};
use synthd_core::schema::validate;
use synthd_core::{Mode, SchemaCache};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use super::abort::AbortStore;
use super::auth;
use super::config::ServerConfig;
use super::dispatch::Dispatcher;
use super::error::ApiError;
use super::pool::manager::WorkerPool;
use super::registry::JobRegistry;
use super::streaming::{
    MULTI_CHUNK_BOUNDS, SINGLE_CHUNK_BOUNDS, StreamJob, StreamOutcome, StreamSchema,
    clamp_chunk_size, run_stream,
};
use super::telemetry::EngineCounters;

const MIN_COUNT: u64 = 1;
const MAX_COUNT: u64 = 10_000_000;
const MIN_BATCH_SIZE: u64 = 10;
const MAX_BATCH_SIZE: u64 = 10_000;
const DEFAULT_COUNT: u64 = 10;

const MIN_BENCHMARK_ITERATIONS: u64 = 1;
const MAX_BENCHMARK_ITERATIONS: u64 = 100_000;
const DEFAULT_BENCHMARK_ITERATIONS: u64 = 1000;

/// Reference schema exercised by `/benchmark`.
static BENCHMARK_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "format": "uuid" },
            "name": { "type": "string", "minLength": 4, "maxLength": 24 },
            "age": { "type": "integer", "minimum": 0, "maximum": 120 },
            "active": { "type": "boolean" }
        },
        "required": ["id", "name"]
    })
});

/// Shared application state: the engine singletons, constructed once at
/// process init and injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<JobRegistry>,
    pub pool: Arc<WorkerPool>,
    pub dispatcher: Arc<Dispatcher>,
    pub cache: Arc<SchemaCache>,
    pub counters: Arc<EngineCounters>,
    pub abort_store: Option<Arc<AbortStore>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, abort_store: Option<AbortStore>) -> Self {
        let pool = Arc::new(WorkerPool::new(
            config.min_threads,
            config.max_threads,
            Duration::from_secs(config.idle_timeout_secs),
            Duration::from_secs(config.shutdown_timeout_secs),
        ));
        let counters = Arc::new(EngineCounters::default());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&pool), Arc::clone(&counters)));
        let cache = Arc::new(SchemaCache::new(config.schema_cache_size));

        Self {
            config: Arc::new(config),
            registry: Arc::new(JobRegistry::new()),
            pool,
            dispatcher,
            cache,
            counters,
            abort_store: abort_store.map(Arc::new),
            started_at: Instant::now(),
        }
    }
}

/// Builds the service router. Health probes stay public; everything else
/// passes the auth guard.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live));

    let protected = Router::new()
        .route("/generate", post(generate))
        .route("/generate-stream", post(generate_stream))
        .route("/generate-stream-multi", post(generate_stream_multi))
        .route("/validate", post(validate_schema))
        .route("/benchmark", post(benchmark))
        .route("/stop-job/{job_id}", post(stop_job))
        .route("/kill/{request_id}", post(kill))
        .route("/kill-all", post(kill_all))
        .route("/requests", get(requests))
        .route("/pool-stats", get(pool_stats))
        .route("/metrics", get(metrics))
        .route("/gc", post(gc))
        .route("/clear-cache", post(clear_cache))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::guard));

    Router::new()
        .merge(public)
        .merge(protected)
        .fallback(fallback)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(DefaultBodyLimit::max(state.config.body_limit_bytes))
        .with_state(state)
}

// === Request shapes ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    schema: Option<Value>,
    schemas: Option<Vec<SchemaEntry>>,
    count: Option<u64>,
    validate_data: Option<bool>,
    random_mode: Option<bool>,
    streaming: Option<bool>,
    batch_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaEntry {
    schema: Value,
    collection: Option<String>,
    count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BenchmarkRequest {
    iterations: Option<u64>,
}

struct JobSpec {
    entries: Vec<JobEntry>,
    fuzz: bool,
    validate_data: bool,
    batch_size: Option<usize>,
    single_shape: bool,
}

struct JobEntry {
    schema: Value,
    collection: Option<String>,
    count: usize,
}

impl JobSpec {
    fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| e.count as u64).sum()
    }
}

fn check_count(count: u64) -> Result<u64, ApiError> {
    if !(MIN_COUNT..=MAX_COUNT).contains(&count) {
        return Err(ApiError::validation(format!(
            "count must be between {MIN_COUNT} and {MAX_COUNT}, got {count}"
        )));
    }
    Ok(count)
}

/// Normalizes a generate request into a list of (schema, collection, count)
/// entries, rejecting malformed combinations up front.
fn normalize(req: GenerateRequest) -> Result<JobSpec, ApiError> {
    if req.streaming == Some(true) {
        // Accepted for backwards compatibility; the buffered endpoint
        // always buffers.
        tracing::debug!("ignoring `streaming` flag on buffered endpoint");
    }

    let batch_size = match req.batch_size {
        Some(size) => {
            if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
                return Err(ApiError::validation(format!(
                    "batchSize must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {size}"
                )));
            }
            Some(size as usize)
        }
        None => None,
    };

    let default_count = match req.count {
        Some(count) => check_count(count)?,
        None => DEFAULT_COUNT,
    };

    let (entries, single_shape) = match (req.schema, req.schemas) {
        (Some(_), Some(_)) => {
            return Err(ApiError::validation(
                "exactly one of `schema` or `schemas` must be present",
            ));
        }
        (None, None) => {
            return Err(ApiError::validation(
                "one of `schema` or `schemas` is required",
            ));
        }
        (Some(schema), None) => (
            vec![JobEntry {
                schema,
                collection: None,
                count: default_count as usize,
            }],
            true,
        ),
        (None, Some(raw)) => {
            if raw.is_empty() {
                return Err(ApiError::validation("`schemas` must not be empty"));
            }
            let mut entries = Vec::with_capacity(raw.len());
            for entry in raw {
                let count = match entry.count {
                    Some(count) => check_count(count)?,
                    None => default_count,
                };
                entries.push(JobEntry {
                    schema: entry.schema,
                    collection: entry.collection,
                    count: count as usize,
                });
            }
            let single_shape = entries.len() == 1 && entries[0].collection.is_none();
            (entries, single_shape)
        }
    };

    for entry in &entries {
        validate::well_formed(&entry.schema)
            .map_err(|e| ApiError::validation(e.to_string()))?;
    }

    Ok(JobSpec {
        entries,
        fuzz: req.random_mode.unwrap_or(false),
        validate_data: req.validate_data.unwrap_or(false),
        batch_size,
        single_shape,
    })
}

fn external_job_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-job-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(ApiError::validation(format!(
            "invalid JSON body: {rejection}"
        ))),
    }
}

// === Job lifecycle guard ===

/// Ties a registered job to its handler's lifetime.
///
/// Every deliberate exit path calls [`finish`](JobGuard::finish); a guard
/// dropped without it means the handler future was dropped mid-job (client
/// disconnect), so the job is cancelled, unregistered, and booked as
/// aborted. Each job settles exactly once either way.
struct JobGuard {
    registry: Arc<JobRegistry>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    request_id: u64,
    finished: bool,
}

impl JobGuard {
    fn new(state: &AppState, request_id: u64, cancel: CancellationToken) -> Self {
        Self {
            registry: Arc::clone(&state.registry),
            dispatcher: Arc::clone(&state.dispatcher),
            cancel,
            request_id,
            finished: false,
        }
    }

    /// Unregisters the job without touching counters; the caller has already
    /// settled the outcome.
    fn finish(&mut self) {
        self.finished = true;
        self.registry.unregister(self.request_id);
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(request_id = self.request_id, "client disconnected, aborting job");
            self.cancel.cancel();
            self.registry.unregister(self.request_id);
            self.dispatcher.job_aborted();
        }
    }
}

/// Whether a freshly registered job already carries a distributed stop
/// mark; a replica that sees one starts pre-cancelled.
async fn pre_stopped(state: &AppState, external: Option<&str>) -> bool {
    match (&state.abort_store, external) {
        (Some(store), Some(external)) => store.is_stopped(external).await,
        _ => false,
    }
}

// === Generation handlers ===

async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let spec = normalize(parse_body(body)?)?;
    let external = external_job_id(&headers);
    let mode = if spec.fuzz { Mode::Fuzz } else { Mode::Strict };

    let (request_id, cancel) = state.registry.register(external.clone(), spec.total_count());
    let mut guard = JobGuard::new(&state, request_id, cancel.clone());
    if pre_stopped(&state, external.as_deref()).await {
        cancel.cancel();
    }

    let start = Instant::now();
    let mut outputs: Vec<(usize, Vec<Value>, Duration)> = Vec::with_capacity(spec.entries.len());
    let mut delivered: u64 = 0;

    for (index, entry) in spec.entries.iter().enumerate() {
        let prepared = state.cache.prepare(&entry.schema, mode);
        let entry_start = Instant::now();
        match state
            .dispatcher
            .run_batch(prepared, entry.count, spec.fuzz, &cancel)
            .await
        {
            Ok(records) => {
                delivered += records.len() as u64;
                outputs.push((index, records, entry_start.elapsed()));
            }
            Err(e) if e.is_cancelled() => {
                state.dispatcher.job_aborted();
                guard.finish();
                return Err(ApiError::aborted(external.as_deref()).with_request_id(request_id));
            }
            Err(e) => {
                guard.finish();
                return Err(
                    ApiError::from_engine(e, external.as_deref()).with_request_id(request_id)
                );
            }
        }
    }

    let elapsed = start.elapsed();
    state.dispatcher.job_completed(delivered, elapsed);
    guard.finish();

    let response = if spec.single_shape {
        single_shape_response(&state, &spec, outputs, delivered, elapsed)?
    } else {
        multi_shape_response(&spec, outputs, delivered, elapsed)
    };
    Ok(Json(response))
}

/// The backwards-compatible single-schema shape: `valid`/`invalid` shadow
/// `results`. Preserved exactly; callers depend on it.
fn single_shape_response(
    state: &AppState,
    spec: &JobSpec,
    mut outputs: Vec<(usize, Vec<Value>, Duration)>,
    delivered: u64,
    elapsed: Duration,
) -> Result<Value, ApiError> {
    let (_, records, _) = outputs.swap_remove(0);
    let (valid, invalid) = if spec.validate_data {
        let schema = &spec.entries[0].schema;
        let mut valid = Vec::with_capacity(records.len());
        let mut invalid = Vec::new();
        for record in &records {
            let errors = state
                .cache
                .validate_data(record, schema)
                .map_err(|e| ApiError::from_engine(e, None))?;
            if errors.is_empty() {
                valid.push(record.clone());
            } else {
                invalid.push(json!({ "record": record, "errors": errors }));
            }
        }
        (valid, invalid)
    } else {
        (records.clone(), Vec::new())
    };

    Ok(json!({
        "success": true,
        "totalRecordsGenerated": delivered,
        "schemasProcessed": 1,
        "results": records,
        "valid": valid,
        "invalid": invalid,
        "stats": job_stats(delivered, elapsed),
    }))
}

fn multi_shape_response(
    spec: &JobSpec,
    outputs: Vec<(usize, Vec<Value>, Duration)>,
    delivered: u64,
    elapsed: Duration,
) -> Value {
    let results: Vec<Value> = outputs
        .into_iter()
        .map(|(index, records, entry_elapsed)| {
            let entry = &spec.entries[index];
            let collection = entry
                .collection
                .clone()
                .unwrap_or_else(|| format!("schema_{index}"));
            let count = records.len() as u64;
            json!({
                "collection": collection,
                "data": records,
                "stats": job_stats(count, entry_elapsed),
            })
        })
        .collect();

    json!({
        "success": true,
        "totalRecordsGenerated": delivered,
        "schemasProcessed": spec.entries.len(),
        "results": results,
        "stats": job_stats(delivered, elapsed),
    })
}

fn job_stats(records: u64, elapsed: Duration) -> Value {
    let seconds = elapsed.as_secs_f64().max(0.001);
    json!({
        "count": records,
        "durationMs": elapsed.as_millis() as u64,
        "recordsPerSecond": (records as f64 / seconds).round(),
    })
}

// === Streaming handlers ===

async fn generate_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let spec = normalize(parse_body(body)?)?;
    if spec.entries.len() != 1 {
        return Err(ApiError::validation(
            "streaming accepts exactly one schema; use /generate-stream-multi for several",
        ));
    }
    let chunk_size = clamp_chunk_size(spec.batch_size, SINGLE_CHUNK_BOUNDS);
    spawn_stream(state, headers, spec, chunk_size, false).await
}

async fn generate_stream_multi(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let spec = normalize(parse_body(body)?)?;
    if spec.entries.len() < 2 {
        return Err(ApiError::validation(
            "multi-schema streaming requires at least two `schemas` entries",
        ));
    }
    let chunk_size = clamp_chunk_size(spec.batch_size, MULTI_CHUNK_BOUNDS);
    spawn_stream(state, headers, spec, chunk_size, true).await
}

async fn spawn_stream(
    state: AppState,
    headers: HeaderMap,
    spec: JobSpec,
    chunk_size: usize,
    multi: bool,
) -> Result<Response, ApiError> {
    let external = external_job_id(&headers);
    let (request_id, cancel) = state.registry.register(external.clone(), spec.total_count());
    // The guard goes up before the first await so a disconnect during the
    // store round-trip still unwinds the registration.
    let mut guard = JobGuard::new(&state, request_id, cancel.clone());

    // Nothing has been written yet, so a pre-stopped job can still get a
    // proper status instead of a one-record stream.
    if pre_stopped(&state, external.as_deref()).await {
        cancel.cancel();
        state.dispatcher.job_aborted();
        guard.finish();
        return Err(ApiError::aborted(external.as_deref()).with_request_id(request_id));
    }
    let job = StreamJob {
        schemas: spec
            .entries
            .into_iter()
            .map(|entry| StreamSchema {
                schema: Arc::new(entry.schema),
                collection: entry.collection,
                count: entry.count,
            })
            .collect(),
        fuzz: spec.fuzz,
        chunk_size,
        cancel,
        multi,
    };

    let (tx, rx) = mpsc::channel(state.config.stream_buffer_size);
    let producer = {
        let state = state.clone();
        async move {
            let outcome = run_stream(&state.pool, job, &tx).await;
            match outcome {
                StreamOutcome::Completed { records, elapsed } => {
                    state.dispatcher.job_completed(records, elapsed);
                }
                StreamOutcome::Aborted => state.dispatcher.job_aborted(),
                StreamOutcome::Failed => {}
            }
            guard.finish();
        }
    };
    tokio::spawn(producer);

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .map_err(ApiError::internal)
}

// === Validation & benchmark ===

async fn validate_schema(
    State(_state): State<AppState>,
    body: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = parse_body(body)?;
    let schema = req
        .schema
        .ok_or_else(|| ApiError::validation("`schema` is required"))?;

    match validate::validate_schema(&schema) {
        Ok(()) => Ok(Json(json!({ "success": true, "valid": true }))),
        Err(errors) => {
            let message = errors
                .first()
                .cloned()
                .unwrap_or_else(|| "schema is invalid".to_string());
            Err(ApiError::validation(message).with_extras(json!({ "errors": errors })))
        }
    }
}

async fn benchmark(
    State(state): State<AppState>,
    body: Result<Json<BenchmarkRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = parse_body(body)?;
    let iterations = req
        .iterations
        .unwrap_or(DEFAULT_BENCHMARK_ITERATIONS)
        .clamp(MIN_BENCHMARK_ITERATIONS, MAX_BENCHMARK_ITERATIONS);

    let prepared = state.cache.prepare(&BENCHMARK_SCHEMA, Mode::Strict);
    let start = Instant::now();
    let mut rng = StdRng::from_rng(&mut rand::rng());
    for i in 0..iterations {
        let _ = synthd_core::one(&prepared, false, &mut rng);
        if i % 512 == 511 {
            tokio::task::yield_now().await;
        }
    }
    let elapsed = start.elapsed();
    let seconds = elapsed.as_secs_f64().max(0.001);

    Ok(Json(json!({
        "success": true,
        "iterations": iterations,
        "durationMs": elapsed.as_millis() as u64,
        "recordsPerSecond": (iterations as f64 / seconds).round(),
    })))
}

// === Cancellation handlers ===

async fn stop_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<Value> {
    let stopped = state.registry.cancel_by_external_job_id(&job_id);
    // Mark the id for other replicas regardless of whether it was known
    // locally; a replica still queueing this job must see the stop.
    if let Some(store) = &state.abort_store {
        store
            .set_stop(&job_id, state.config.abort_store_ttl_secs)
            .await;
    }
    tracing::info!(job_id, stopped, "stop requested");
    Json(json!({ "success": true, "stopped": stopped, "jobId": job_id }))
}

async fn kill(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let request_id: u64 = request_id
        .parse()
        .map_err(|_| ApiError::validation("requestId must be an integer"))?;
    let killed = state.registry.cancel_by_request_id(request_id);
    Ok(Json(
        json!({ "success": true, "killed": killed, "requestId": request_id }),
    ))
}

async fn kill_all(State(state): State<AppState>) -> Json<Value> {
    let killed = state.registry.cancel_all();
    tracing::info!(killed, "killed all active jobs");
    Json(json!({ "success": true, "killed": killed }))
}

// === Observability & operations ===

async fn requests(State(state): State<AppState>) -> Json<Value> {
    let jobs = state.registry.list();
    Json(json!({
        "success": true,
        "activeRequests": jobs.len(),
        "requests": jobs,
    }))
}

async fn pool_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "pool": state.pool.stats() }))
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "counters": state.counters.snapshot(),
        "pool": state.pool.stats(),
        "cache": state.cache.stats(),
        "activeRequests": state.registry.active_count(),
        "uptimeMs": state.started_at.elapsed().as_millis() as u64,
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptimeMs": state.started_at.elapsed().as_millis() as u64,
    }))
}

async fn ready(State(state): State<AppState>) -> Response {
    if state.pool.worker_count() > 0 {
        Json(json!({ "status": "ready" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready" })),
        )
            .into_response()
    }
}

async fn live() -> Json<Value> {
    Json(json!({ "status": "live" }))
}

async fn gc(State(state): State<AppState>) -> Json<Value> {
    // The runtime has no collector to poke; report cache pressure instead.
    Json(json!({
        "success": true,
        "collected": false,
        "cache": state.cache.stats(),
    }))
}

async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    state.cache.clear();
    tracing::info!("schema caches cleared");
    Json(json!({ "success": true, "cleared": true }))
}

async fn fallback() -> ApiError {
    ApiError::not_found()
}
