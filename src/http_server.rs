use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};

use crate::error::CoreError;
use crate::generation::GenerationKind;
use crate::models::{Collection, CollectionUpdate, DocumentRef, GeneratedDocument, Run, RunInput, RunType};
use crate::pdf_parser::estimate_page_count;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

/// Largest accepted PDF upload
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub token: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    #[serde(rename = "type")]
    pub run_type: RunType,
    #[serde(default)]
    pub input: RunInput,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub documents: Vec<DocumentRef>,
}

/// Error body returned by every failing handler
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        let status = match &e {
            CoreError::CollectionNotFound(_)
            | CoreError::DocumentNotFound(_)
            | CoreError::RunNotFound(_) => StatusCode::NOT_FOUND,
            CoreError::NoSourceDocument
            | CoreError::InvalidComparison(_)
            | CoreError::InvalidSelection(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::NotResubmittable(_) => StatusCode::CONFLICT,
            CoreError::CompletionFailure(_) | CoreError::ExtractionFailure(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            log::error!("Request failed: {}", e);
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse {
                success: false,
                message: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    // The reader UI is served from another local origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/settings", get(get_settings))
        .route("/api/repos", get(list_repos).post(import_repo))
        .route(
            "/api/repos/:id",
            get(get_repo).patch(update_repo).delete(delete_repo),
        )
        .route("/api/repos/:id/name", put(rename_repo))
        .route("/api/repos/:id/documents/:doc_id", get(get_document))
        .route("/api/repos/:id/runs", get(list_runs).post(create_run))
        .route("/api/repos/:id/generate/:kind", post(generate))
        .route("/api/repos/:id/compare", post(compare))
        .route("/api/runs/:run_id", get(get_run))
        .route("/api/runs/:run_id/resubmit", post(resubmit_run))
        .route("/api/repos/:id/share", post(share_repo))
        .route("/api/share/:token", get(open_share))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Serve the JSON API on `127.0.0.1:<server_port>` until the process exits
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], state.config.server_port));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config)
}

async fn list_repos(State(state): State<AppState>) -> Json<Vec<Collection>> {
    Json(state.store.list())
}

async fn import_repo(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Collection>)> {
    if body.is_empty() {
        return Err(ApiError::bad_request("request body must contain the PDF bytes"));
    }
    let name = query.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }

    let page_count = estimate_page_count(&body);
    let collection = state.store.import(name, body.to_vec(), page_count);
    Ok((StatusCode::CREATED, Json(collection)))
}

async fn get_repo(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Collection>> {
    Ok(Json(state.store.get(&id)?))
}

async fn update_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<CollectionUpdate>,
) -> ApiResult<Json<Collection>> {
    Ok(Json(state.store.update_metadata(&id, update)?))
}

async fn rename_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<Collection>> {
    state.store.rename(&id, &request.name)?;
    Ok(Json(state.store.get(&id)?))
}

async fn delete_repo(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<ApiResponse>> {
    state.store.delete(&id)?;
    let purged = state.engine.purge(&id);
    Ok(Json(ApiResponse {
        success: true,
        message: format!("Deleted collection {} and {} run(s)", id, purged),
    }))
}

async fn share_repo(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<ShareResponse>> {
    let token = state.store.share_token(&id)?;
    Ok(Json(ShareResponse {
        url: format!("http://127.0.0.1:{}/api/share/{}", state.config.server_port, token),
        token,
    }))
}

async fn open_share(State(state): State<AppState>, Path(token): Path<String>) -> ApiResult<Json<Collection>> {
    Ok(Json(state.store.resolve_share(&token)?))
}

async fn get_document(
    State(state): State<AppState>,
    Path((id, doc_id)): Path<(String, String)>,
) -> ApiResult<Json<GeneratedDocument>> {
    Ok(Json(state.store.document(&id, &doc_id)?))
}

async fn list_runs(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Vec<Run>>> {
    state.store.get(&id)?;
    Ok(Json(state.engine.get_runs(&id)))
}

async fn create_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreateRunRequest>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let run = state.engine.create_run(&id, request.run_type, request.input)?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> ApiResult<Json<Run>> {
    Ok(Json(state.engine.get_run(&run_id)?))
}

async fn resubmit_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let run = state.engine.resubmit(&run_id)?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

async fn generate(
    State(state): State<AppState>,
    Path((id, kind)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<GeneratedDocument>)> {
    let kind: GenerationKind = kind.parse().map_err(|e: String| ApiError {
        status: StatusCode::NOT_FOUND,
        message: e,
    })?;
    let document = state.pipeline.generate(&id, kind).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn compare(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CompareRequest>,
) -> ApiResult<(StatusCode, Json<GeneratedDocument>)> {
    let document = state.pipeline.compare(&id, &request.documents).await?;
    Ok((StatusCode::CREATED, Json(document)))
}
