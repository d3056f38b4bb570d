//! Axum JSON API for BenchBoard.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use benchboard_ai::Matcher;
use benchboard_core::{
    BenchDigest, CandidateMatch, ColumnMapping, DashboardSnapshot, DedupOutcome, ExcelUpload,
    MatchSummary, NewExcelUpload, RecordKind, Resource, ResourceSummary, Rrf, RrfDigest,
    RrfMatches, Stored,
};
use benchboard_ingest::{RawRow, RowMapper};
use benchboard_pipeline::{
    refresh_dashboard, IngestError, IngestPipeline, IngestReport, IngestRequest,
};
use benchboard_storage::{DbDiagnostics, InitOutcome, Store};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

mod error;

pub use error::{ApiError, Environment};

pub const CRATE_NAME: &str = "benchboard-web";

pub struct AppState {
    pub store: Store,
    pub pipeline: IngestPipeline,
    pub matcher: Arc<dyn Matcher>,
    pub environment: Environment,
}

impl AppState {
    pub fn new(
        store: Store,
        mapper: RowMapper,
        matcher: Arc<dyn Matcher>,
        environment: Environment,
    ) -> Self {
        Self {
            pipeline: IngestPipeline::new(store.clone(), mapper),
            store,
            matcher,
            environment,
        }
    }

    pub fn mapper(&self) -> &RowMapper {
        self.pipeline.mapper()
    }

    /// `map_err` adapter turning a dependency failure into a 500.
    fn upstream<E: Display>(&self, message: &'static str) -> impl FnOnce(E) -> ApiError {
        let environment = self.environment;
        move |err| ApiError::upstream(environment, message, err)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/resources", get(list_resources).post(create_resources))
        .route("/api/resources/dedup", post(dedup_resources))
        .route("/api/resources/{vamid}", get(get_resource))
        .route("/api/bench-resources", post(upsert_bench_resources))
        .route("/api/rrfs", get(list_rrfs).post(create_rrfs))
        .route("/api/excel-uploads", get(list_uploads).post(create_upload))
        .route("/api/ingest", post(ingest))
        .route("/api/dashboard", get(dashboard))
        .route("/api/init-db", post(init_db))
        .route("/api/db-test", get(db_test))
        .route("/api/match/best-candidate", post(match_best_candidate))
        .route("/api/match/rrfs", post(match_rrfs))
        .route("/api/match/summary", post(summarize_matches))
        .route("/api/column-mapping", post(suggest_column_mapping))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, environment = ?state.environment, "benchboard api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

type ApiResult<T> = Result<T, ApiError>;
type JsonBody<T> = Result<Json<T>, JsonRejection>;

#[derive(Debug, Serialize)]
struct Data<T> {
    data: T,
}

/// A JSON body holding either one record or an array of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

const MISSING_IDENTITY: &str = "Every resource needs a vamid and a name";

fn has_identity(vamid: &str, name: &str) -> bool {
    !vamid.trim().is_empty() && !name.trim().is_empty()
}

fn require(condition: bool, message: &str) -> ApiResult<()> {
    if condition {
        Ok(())
    } else {
        Err(ApiError::BadRequest(message.to_string()))
    }
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Data<Vec<Stored<Resource>>>>> {
    let resources = state
        .store
        .list_resources()
        .await
        .map_err(state.upstream("Failed to fetch resources"))?;
    Ok(Json(Data { data: resources }))
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path(vamid): Path<String>,
) -> ApiResult<Json<Data<Option<Stored<Resource>>>>> {
    let resource = state
        .store
        .get_resource(&vamid)
        .await
        .map_err(state.upstream("Failed to fetch resource"))?;
    Ok(Json(Data { data: resource }))
}

async fn create_resources(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<OneOrMany<ResourceSummary>>,
) -> ApiResult<(StatusCode, Json<Data<Vec<Stored<Resource>>>>)> {
    let Json(body) = payload?;
    let resources = body.into_vec();
    require(!resources.is_empty(), "No resources provided")?;
    require(
        resources.iter().all(|r| has_identity(&r.vamid, &r.name)),
        MISSING_IDENTITY,
    )?;

    state
        .store
        .ensure_initialized()
        .await
        .map_err(state.upstream("Failed to initialize database"))?;
    let written = state
        .store
        .upsert_resource_summaries(&resources)
        .await
        .map_err(state.upstream("Failed to save resources"))?;
    Ok((StatusCode::CREATED, Json(Data { data: written })))
}

#[derive(Debug, Deserialize)]
struct BenchResourcesBody {
    resources: Vec<Resource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RowsAffected {
    rows_affected: u64,
}

async fn upsert_bench_resources(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<BenchResourcesBody>,
) -> ApiResult<Json<RowsAffected>> {
    let Json(body) = payload?;
    require(!body.resources.is_empty(), "No resources provided")?;
    require(
        body.resources.iter().all(|r| has_identity(&r.vamid, &r.name)),
        MISSING_IDENTITY,
    )?;

    state
        .store
        .ensure_initialized()
        .await
        .map_err(state.upstream("Failed to initialize database"))?;
    let rows_affected = state
        .store
        .upsert_resources(&body.resources)
        .await
        .map_err(state.upstream("Failed to save bench resources"))?;
    Ok(Json(RowsAffected { rows_affected }))
}

async fn list_rrfs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Data<Vec<Stored<Rrf>>>>> {
    let rrfs = state
        .store
        .list_rrfs()
        .await
        .map_err(state.upstream("Failed to fetch RRFs"))?;
    Ok(Json(Data { data: rrfs }))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RrfPayload {
    Wrapped { rrfs: Vec<Rrf> },
    Bare(OneOrMany<Rrf>),
}

#[derive(Debug, Serialize)]
struct RrfsCreated {
    success: bool,
    count: usize,
    rrfs: Vec<Stored<Rrf>>,
}

async fn create_rrfs(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<RrfPayload>,
) -> ApiResult<(StatusCode, Json<RrfsCreated>)> {
    let Json(body) = payload?;
    let rrfs = match body {
        RrfPayload::Wrapped { rrfs } => rrfs,
        RrfPayload::Bare(bare) => bare.into_vec(),
    };
    require(!rrfs.is_empty(), "No RRFs provided")?;
    require(
        rrfs.iter().all(|r| !r.rrf_id.trim().is_empty()),
        "Every RRF needs an rrfId",
    )?;

    state
        .store
        .ensure_initialized()
        .await
        .map_err(state.upstream("Failed to initialize database"))?;
    let written = state
        .store
        .upsert_rrfs(&rrfs)
        .await
        .map_err(state.upstream("Failed to save RRFs"))?;
    Ok((
        StatusCode::CREATED,
        Json(RrfsCreated {
            success: true,
            count: written.len(),
            rrfs: written,
        }),
    ))
}

async fn list_uploads(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Data<Vec<ExcelUpload>>>> {
    let uploads = state
        .store
        .list_uploads()
        .await
        .map_err(state.upstream("Failed to fetch upload history"))?;
    Ok(Json(Data { data: uploads }))
}

async fn create_upload(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<NewExcelUpload>,
) -> ApiResult<(StatusCode, Json<Data<ExcelUpload>>)> {
    let Json(upload) = payload?;
    require(!upload.file_name.trim().is_empty(), "fileName is required")?;

    state
        .store
        .ensure_initialized()
        .await
        .map_err(state.upstream("Failed to initialize database"))?;
    let recorded = state
        .store
        .record_upload(&upload)
        .await
        .map_err(state.upstream("Failed to record upload"))?;
    Ok((StatusCode::CREATED, Json(Data { data: recorded })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestBody {
    kind: RecordKind,
    file_name: String,
    file_size: Option<i32>,
    uploaded_by: Option<String>,
    rows: Vec<RawRow>,
    #[serde(default)]
    mapping: Option<ColumnMapping>,
}

async fn ingest(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<IngestBody>,
) -> ApiResult<(StatusCode, Json<IngestReport>)> {
    let Json(body) = payload?;
    require(!body.file_name.trim().is_empty(), "fileName is required")?;

    let report = state
        .pipeline
        .ingest(IngestRequest {
            kind: body.kind,
            file_name: body.file_name,
            file_size: body.file_size,
            uploaded_by: body.uploaded_by,
            rows: body.rows,
            mapping: body.mapping,
        })
        .await
        .map_err(|err: IngestError| match err {
            IngestError::Mapping(mapping) => ApiError::BadRequest(mapping.to_string()),
            other => ApiError::upstream(state.environment, "Failed to ingest rows", other),
        })?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn dashboard(State(state): State<Arc<AppState>>) -> ApiResult<Json<DashboardSnapshot>> {
    let snapshot = refresh_dashboard(&state.store, Utc::now().date_naive())
        .await
        .map_err(state.upstream("Failed to compute dashboard metrics"))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Serialize)]
struct InitResponse {
    success: bool,
    outcome: InitOutcome,
}

async fn init_db(State(state): State<Arc<AppState>>) -> ApiResult<Json<InitResponse>> {
    let outcome = state
        .store
        .ensure_initialized()
        .await
        .map_err(state.upstream("Failed to initialize database"))?;
    Ok(Json(InitResponse {
        success: true,
        outcome,
    }))
}

#[derive(Debug, Serialize)]
struct DbTestResponse {
    success: bool,
    #[serde(flatten)]
    diagnostics: DbDiagnostics,
    init: InitOutcome,
}

async fn db_test(State(state): State<Arc<AppState>>) -> ApiResult<Json<DbTestResponse>> {
    let diagnostics = state
        .store
        .diagnostics()
        .await
        .map_err(state.upstream("Database connection failed"))?;
    let init = state
        .store
        .ensure_initialized()
        .await
        .map_err(state.upstream("Failed to initialize database"))?;
    Ok(Json(DbTestResponse {
        success: true,
        diagnostics,
        init,
    }))
}

/// Bench digests from the request rows, or from stored resources when the
/// request carries none.
async fn bench_digests(state: &AppState, rows: Option<Vec<RawRow>>) -> ApiResult<Vec<BenchDigest>> {
    let bench: Vec<BenchDigest> = match rows {
        Some(rows) => rows
            .iter()
            .filter_map(|row| state.mapper().bench_digest(row))
            .collect(),
        None => state
            .store
            .list_resources()
            .await
            .map_err(state.upstream("Failed to fetch resources"))?
            .iter()
            .map(|stored| BenchDigest::from(&stored.record))
            .collect(),
    };
    require(!bench.is_empty(), "No bench resources with a name and VAMID")?;
    Ok(bench)
}

#[derive(Debug, Deserialize)]
struct BestCandidateBody {
    rrf: RawRow,
    #[serde(default)]
    bench: Option<Vec<RawRow>>,
}

async fn match_best_candidate(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<BestCandidateBody>,
) -> ApiResult<Json<CandidateMatch>> {
    let Json(body) = payload?;
    let rrf = state
        .mapper()
        .rrf_digest(&body.rrf)
        .ok_or_else(|| ApiError::BadRequest("The RRF has no RRF ID".to_string()))?;
    let bench = bench_digests(&state, body.bench).await?;

    let best = state
        .matcher
        .best_candidate(&rrf, &bench)
        .await
        .map_err(state.upstream("Failed to find the best candidate"))?;
    Ok(Json(best))
}

#[derive(Debug, Deserialize)]
struct MatchRrfsBody {
    rrfs: Vec<RawRow>,
    #[serde(default)]
    bench: Option<Vec<RawRow>>,
    #[serde(default)]
    summarize: bool,
}

#[derive(Debug, Serialize)]
struct MatchRrfsResponse {
    results: Vec<RrfMatches>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

async fn match_rrfs(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<MatchRrfsBody>,
) -> ApiResult<Json<MatchRrfsResponse>> {
    let Json(body) = payload?;
    let rrfs: Vec<RrfDigest> = body
        .rrfs
        .iter()
        .filter_map(|row| state.mapper().rrf_digest(row))
        .collect();
    require(!rrfs.is_empty(), "No RRFs with an RRF ID")?;
    let bench = bench_digests(&state, body.bench).await?;

    let results = state
        .matcher
        .best_candidates_for_all(&rrfs, &bench)
        .await
        .map_err(state.upstream("Failed to match candidates"))?;

    let summary = if body.summarize {
        let summary = state
            .matcher
            .summarize(&results)
            .await
            .map_err(state.upstream("Failed to summarize matches"))?;
        Some(summary.summary)
    } else {
        None
    };
    Ok(Json(MatchRrfsResponse { results, summary }))
}

#[derive(Debug, Deserialize)]
struct SummaryBody {
    results: Vec<RrfMatches>,
}

async fn summarize_matches(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<SummaryBody>,
) -> ApiResult<Json<MatchSummary>> {
    let Json(body) = payload?;
    let summary = state
        .matcher
        .summarize(&body.results)
        .await
        .map_err(state.upstream("Failed to summarize matches"))?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnMappingBody {
    columns: Vec<String>,
    #[serde(default)]
    data_fields: Option<Vec<String>>,
}

async fn suggest_column_mapping(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<ColumnMappingBody>,
) -> ApiResult<Json<ColumnMapping>> {
    let Json(body) = payload?;
    require(!body.columns.is_empty(), "No spreadsheet columns provided")?;
    let data_fields = body
        .data_fields
        .unwrap_or_else(|| state.mapper().aliases().data_fields());

    let mapping = state
        .matcher
        .suggest_column_mapping(&body.columns, &data_fields)
        .await
        .map_err(state.upstream("Failed to suggest column mappings"))?;
    Ok(Json(mapping))
}

#[derive(Debug, Deserialize)]
struct DedupBody {
    rows: Vec<RawRow>,
}

async fn dedup_resources(
    State(state): State<Arc<AppState>>,
    payload: JsonBody<DedupBody>,
) -> ApiResult<Json<DedupOutcome>> {
    let Json(body) = payload?;
    let rows: Vec<BenchDigest> = body
        .rows
        .iter()
        .filter_map(|row| state.mapper().bench_digest(row))
        .collect();
    require(!rows.is_empty(), "No rows with a name and VAMID")?;

    let previous = state
        .store
        .list_vamids()
        .await
        .map_err(state.upstream("Failed to fetch existing resources"))?;
    let outcome = state
        .matcher
        .deduplicate(&rows, &previous)
        .await
        .map_err(state.upstream("Failed to analyze resources"))?;
    Ok(Json(outcome))
}
