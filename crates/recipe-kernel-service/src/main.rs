use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use recipe_kernel_api::{
    KernelConfig, RecipeKernelApi, RecommendRequest, RecommendResult, SearchHit, SessionRegistry,
    SessionSnapshot, TurnRequest, API_CONTRACT_VERSION,
};
use recipe_kernel_core::{CorpusStats, TurnOutcome};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ulid::Ulid;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: RecipeKernelApi,
    sessions: Arc<SessionRegistry>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    records: usize,
    sessions: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize)]
struct SearchResponse {
    query: String,
    hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize)]
struct TurnResponse {
    session_id: Ulid,
    outcome: TurnOutcome,
    summary: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct DeleteResponse {
    session_id: Ulid,
    deleted: bool,
}

#[derive(Debug, Parser)]
#[command(name = "recipe-kernel-service")]
#[command(about = "Local HTTP service for Recipe Kernel")]
struct Args {
    /// Recipe corpus: a raw dataset `.csv` or a normalized `.json` array.
    #[arg(long)]
    corpus: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Sessions without a turn for this many minutes are dropped.
    #[arg(long, default_value_t = 60)]
    session_idle_minutes: u32,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn new(api: RecipeKernelApi) -> Self {
        Self { api, sessions: Arc::new(SessionRegistry::new()) }
    }

    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError {
            status: StatusCode::BAD_REQUEST,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }

    fn not_found(session_id: Ulid) -> ServiceError {
        ServiceError {
            status: StatusCode::NOT_FOUND,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: format!("session {session_id} not found"),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn parse_session_id(raw: &str) -> Result<Ulid, ServiceError> {
    Ulid::from_string(raw).map_err(|err| ServiceState::error(format!("invalid session id `{raw}`: {err}")))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/corpus/stats", get(corpus_stats))
        .route("/v1/search", post(search))
        .route("/v1/recommend", post(recommend))
        .route("/v1/sessions", post(session_create))
        .route("/v1/sessions/:session_id", get(session_show).delete(session_delete))
        .route("/v1/sessions/:session_id/turn", post(session_turn))
        .route("/v1/sessions/:session_id/more", post(session_more))
        .route("/v1/sessions/:session_id/reset", post(session_reset))
        .with_state(state)
}

fn spawn_idle_sweep(sessions: Arc<SessionRegistry>, max_idle: Duration) {
    let period = StdDuration::from_secs(60);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle(OffsetDateTime::now_utc(), max_idle);
            if evicted > 0 {
                tracing::info!(evicted, remaining = sessions.len(), "idle sessions evicted");
            }
        }
    });
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = match args.config.as_deref() {
        Some(path) => KernelConfig::load(path)?,
        None => KernelConfig::default(),
    };
    let api = RecipeKernelApi::open(&args.corpus, config)?;
    let state = ServiceState::new(api);
    spawn_idle_sweep(
        Arc::clone(&state.sessions),
        Duration::minutes(i64::from(args.session_idle_minutes.max(1))),
    );
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "recipe kernel service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse {
        status: "ok",
        records: state.api.engine().corpus().len(),
        sessions: state.sessions.len(),
    }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn corpus_stats(State(state): State<ServiceState>) -> Json<ServiceEnvelope<CorpusStats>> {
    Json(envelope(state.api.corpus_stats()))
}

async fn search(
    State(state): State<ServiceState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<ServiceEnvelope<SearchResponse>>, ServiceError> {
    let hits = state
        .api
        .search(&request.query, request.limit)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(SearchResponse { query: request.query, hits })))
}

async fn recommend(
    State(state): State<ServiceState>,
    Json(request): Json<RecommendRequest>,
) -> Result<Json<ServiceEnvelope<RecommendResult>>, ServiceError> {
    let result =
        state.api.recommend_stateless(&request).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn session_create(State(state): State<ServiceState>) -> Json<ServiceEnvelope<SessionSnapshot>> {
    Json(envelope(state.sessions.create()))
}

async fn session_show(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
) -> Result<Json<ServiceEnvelope<SessionSnapshot>>, ServiceError> {
    let session_id = parse_session_id(&session_id)?;
    let snapshot = state.sessions.get(session_id).ok_or_else(|| ServiceState::not_found(session_id))?;
    Ok(Json(envelope(snapshot)))
}

async fn session_delete(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
) -> Result<Json<ServiceEnvelope<DeleteResponse>>, ServiceError> {
    let session_id = parse_session_id(&session_id)?;
    if !state.sessions.remove(session_id) {
        return Err(ServiceState::not_found(session_id));
    }
    Ok(Json(envelope(DeleteResponse { session_id, deleted: true })))
}

async fn session_turn(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<ServiceEnvelope<TurnResponse>>, ServiceError> {
    let session_id = parse_session_id(&session_id)?;
    let api = &state.api;
    let response = state
        .sessions
        .with_session(session_id, |session| {
            let outcome = api.handle_turn(session, &request)?;
            Ok(TurnResponse { session_id, summary: session.preferences.summary_lines(), outcome })
        })
        .map_err(|err| ServiceState::error(err.to_string()))?
        .ok_or_else(|| ServiceState::not_found(session_id))?;
    Ok(Json(envelope(response)))
}

async fn session_more(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
) -> Result<Json<ServiceEnvelope<TurnResponse>>, ServiceError> {
    let session_id = parse_session_id(&session_id)?;
    let api = &state.api;
    let response = state
        .sessions
        .with_session(session_id, |session| {
            let outcome = api.show_more(session)?;
            Ok(TurnResponse { session_id, summary: session.preferences.summary_lines(), outcome })
        })
        .map_err(|err| ServiceState::error(err.to_string()))?
        .ok_or_else(|| ServiceState::not_found(session_id))?;
    Ok(Json(envelope(response)))
}

async fn session_reset(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
) -> Result<Json<ServiceEnvelope<SessionSnapshot>>, ServiceError> {
    let session_id = parse_session_id(&session_id)?;
    let snapshot =
        state.sessions.reset(session_id).ok_or_else(|| ServiceState::not_found(session_id))?;
    Ok(Json(envelope(snapshot)))
}
