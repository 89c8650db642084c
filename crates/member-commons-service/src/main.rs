use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use member_commons_api::{
    FetchListingResult, HttpSource, MemberCommonsApi, MigrateResult, NormalizedListing,
    RecommendRequest, RecommendResult, ScoreSurveyRequest, ScoreSurveyResult, SourceConfig,
    UpstreamError, API_CONTRACT_VERSION, DEFAULT_TIMEOUT_SECS,
};
use member_commons_core::RecordTable;
use member_commons_store_sqlite::{MemberPreferences, SchemaStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: MemberCommonsApi,
    projects: Option<SourceConfig>,
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

#[derive(Debug, Clone, Default, Deserialize)]
struct ProjectsQuery {
    #[serde(default)]
    snapshot: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    upstream_configured: bool,
}

#[derive(Debug, Parser)]
#[command(name = "member-commons-service")]
#[command(about = "Local HTTP service for Member Commons")]
struct Args {
    #[arg(long, env = "MEMBER_COMMONS_DB", default_value = "./member_commons.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "MEMBER_COMMONS_BIND", default_value = "127.0.0.1:8081")]
    bind: SocketAddr,
    #[arg(long, env = "MEMBER_COMMONS_PROJECTS_URL")]
    projects_url: Option<String>,
    #[arg(long, env = "MEMBER_COMMONS_API_TOKEN")]
    api_token: Option<String>,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
}

impl Args {
    fn projects_source(&self) -> Option<SourceConfig> {
        self.projects_url.as_ref().map(|url| {
            SourceConfig::new(url.clone())
                .with_token(self.api_token.clone())
                .with_timeout(Duration::from_secs(self.timeout_secs))
        })
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        Self::error_with_status(StatusCode::BAD_REQUEST, message)
    }

    fn error_with_status(status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
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

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/records/normalize", post(records_normalize))
        .route("/v1/records/table", post(records_table))
        .route("/v1/projects", get(projects_list))
        .route("/v1/projects/recommend", post(projects_recommend))
        .route("/v1/survey/score", post(survey_score))
        .route("/v1/survey/:member", get(survey_show))
        .with_state(state)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "member_commons=info".into()))
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let state = ServiceState { projects: args.projects_source(), api: MemberCommonsApi::new(args.db) };
    if state.projects.is_none() {
        tracing::warn!("no projects upstream configured; GET /v1/projects will be rejected");
    }
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "member commons service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok", upstream_configured: state.projects.is_some() }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result =
        state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn records_normalize(Json(payload): Json<Value>) -> Json<ServiceEnvelope<NormalizedListing>> {
    Json(envelope(MemberCommonsApi::normalize(payload)))
}

async fn records_table(
    Json(payload): Json<Value>,
) -> Result<Json<ServiceEnvelope<RecordTable>>, ServiceError> {
    let table = MemberCommonsApi::table(payload).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(table)))
}

async fn projects_list(
    State(state): State<ServiceState>,
    Query(query): Query<ProjectsQuery>,
) -> Result<Json<ServiceEnvelope<FetchListingResult>>, ServiceError> {
    let Some(config) = state.projects.clone() else {
        return Err(ServiceState::error("no projects upstream is configured"));
    };

    let api = state.api.clone();
    let fetched = tokio::task::spawn_blocking(move || {
        api.fetch_listing(&HttpSource::new(config), query.snapshot)
    })
    .await
    .map_err(|err| {
        ServiceState::error_with_status(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })?;

    match fetched {
        Ok(result) => Ok(Json(envelope(result))),
        Err(err) if err.is::<UpstreamError>() => {
            tracing::warn!(error = %err, "projects upstream fetch failed");
            Err(ServiceState::error_with_status(StatusCode::BAD_GATEWAY, err.to_string()))
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to store projects snapshot");
            Err(ServiceState::error_with_status(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        }
    }
}

async fn projects_recommend(
    Json(request): Json<RecommendRequest>,
) -> Result<Json<ServiceEnvelope<RecommendResult>>, ServiceError> {
    let result =
        MemberCommonsApi::recommend(request).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn survey_score(
    State(state): State<ServiceState>,
    Json(request): Json<ScoreSurveyRequest>,
) -> Result<Json<ServiceEnvelope<ScoreSurveyResult>>, ServiceError> {
    let result =
        state.api.score_survey(request).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn survey_show(
    State(state): State<ServiceState>,
    Path(member): Path<String>,
) -> Result<Json<ServiceEnvelope<MemberPreferences>>, ServiceError> {
    let preferences =
        state.api.latest_preferences(&member).map_err(|err| ServiceState::error(err.to_string()))?;
    match preferences {
        Some(preferences) => Ok(Json(envelope(preferences))),
        None => Err(ServiceState::error_with_status(
            StatusCode::NOT_FOUND,
            format!("no saved survey for member `{member}`"),
        )),
    }
}
