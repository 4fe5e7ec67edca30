use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use scheme_match_api::{
    CategoriesResult, DeleteProfileResult, EvaluateRequest, ListSchemesRequest, MigrateResult,
    NotFound, PutProfileRequest, RecommendRequest, RecommendationPackage, SchemeMatchApi,
    SearchSchemesRequest, SeedResult, UpsertSchemeResult, API_CONTRACT_VERSION,
};
use scheme_match_core::{EvaluationReport, MatchError, Scheme};
use scheme_match_store_sqlite::{ProfileId, SchemaStatus, SchemePage, StoredProfile};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: SchemeMatchApi,
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

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "scheme-match-service")]
#[command(about = "Local HTTP service for scheme eligibility matching")]
struct Args {
    #[arg(long, env = "SCHEME_MATCH_DB", default_value = "./scheme_match.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "SCHEME_MATCH_BIND", default_value = "127.0.0.1:4010")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        let status = if err.downcast_ref::<NotFound>().is_some() {
            StatusCode::NOT_FOUND
        } else if matches!(err.downcast_ref::<MatchError>(), Some(MatchError::Validation(_))) {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::BAD_REQUEST
        };
        if status == StatusCode::BAD_REQUEST {
            tracing::warn!(error = %format!("{err:#}"), "request failed");
        }
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: format!("{err:#}"),
        }
    }
}

type ServiceResult<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

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

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/catalog/seed", post(catalog_seed))
        .route("/v1/schemes", get(schemes_list).post(schemes_upsert))
        .route("/v1/schemes/search", get(schemes_search))
        .route("/v1/categories", get(categories))
        .route("/v1/schemes/:scheme_id", get(schemes_show).delete(schemes_deactivate))
        .route("/v1/profiles", post(profiles_put))
        .route("/v1/profiles/:profile_id", get(profiles_show).delete(profiles_delete))
        .route("/v1/recommendations", post(recommendations))
        .route("/v1/evaluate", post(evaluate_inline))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let state = ServiceState { api: SchemeMatchApi::new(args.db.clone()) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "scheme-match service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(State(state): State<ServiceState>) -> ServiceResult<SchemaStatus> {
    Ok(Json(envelope(state.api.schema_status()?)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> ServiceResult<MigrateResult> {
    Ok(Json(envelope(state.api.migrate(request.dry_run)?)))
}

async fn catalog_seed(State(state): State<ServiceState>) -> ServiceResult<SeedResult> {
    Ok(Json(envelope(state.api.seed_catalog()?)))
}

async fn schemes_list(
    State(state): State<ServiceState>,
    Query(request): Query<ListSchemesRequest>,
) -> ServiceResult<SchemePage> {
    Ok(Json(envelope(state.api.list_schemes(request)?)))
}

async fn schemes_search(
    State(state): State<ServiceState>,
    Query(request): Query<SearchSchemesRequest>,
) -> ServiceResult<SchemePage> {
    Ok(Json(envelope(state.api.search_schemes(request)?)))
}

async fn categories(State(state): State<ServiceState>) -> ServiceResult<CategoriesResult> {
    Ok(Json(envelope(state.api.list_categories()?)))
}

async fn schemes_upsert(
    State(state): State<ServiceState>,
    Json(scheme): Json<Scheme>,
) -> ServiceResult<UpsertSchemeResult> {
    Ok(Json(envelope(state.api.add_scheme(scheme)?)))
}

async fn schemes_show(
    State(state): State<ServiceState>,
    Path(scheme_id): Path<String>,
) -> ServiceResult<Scheme> {
    Ok(Json(envelope(state.api.get_scheme(&scheme_id)?)))
}

async fn schemes_deactivate(
    State(state): State<ServiceState>,
    Path(scheme_id): Path<String>,
) -> ServiceResult<Scheme> {
    Ok(Json(envelope(state.api.deactivate_scheme(&scheme_id)?)))
}

async fn profiles_put(
    State(state): State<ServiceState>,
    Json(request): Json<PutProfileRequest>,
) -> ServiceResult<StoredProfile> {
    Ok(Json(envelope(state.api.put_profile(request)?)))
}

async fn profiles_show(
    State(state): State<ServiceState>,
    Path(profile_id): Path<String>,
) -> ServiceResult<StoredProfile> {
    let profile_id = ProfileId::parse(&profile_id)?;
    Ok(Json(envelope(state.api.get_profile(profile_id)?)))
}

async fn profiles_delete(
    State(state): State<ServiceState>,
    Path(profile_id): Path<String>,
) -> ServiceResult<DeleteProfileResult> {
    let profile_id = ProfileId::parse(&profile_id)?;
    Ok(Json(envelope(state.api.delete_profile(profile_id)?)))
}

async fn recommendations(
    State(state): State<ServiceState>,
    Json(request): Json<RecommendRequest>,
) -> ServiceResult<RecommendationPackage> {
    Ok(Json(envelope(state.api.recommend(request)?)))
}

async fn evaluate_inline(Json(request): Json<EvaluateRequest>) -> ServiceResult<EvaluationReport> {
    Ok(Json(envelope(SchemeMatchApi::evaluate_inline(request)?)))
}
