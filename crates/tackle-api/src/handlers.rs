//! HTTP handlers for the `/windup` surface.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    routing::get,
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::error;

use tackle_core::{Analysis, Issue, Run, RunOptions};
use tackle_jobs::{AnalysisService, Submission};

#[derive(Clone)]
pub struct AppState {
    pub service: AnalysisService,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/windup/analysis",
            get(list_analyses).post(create_analysis),
        )
        .route(
            "/windup/analysis/:id",
            get(get_analysis).put(rerun_analysis).delete(delete_analysis),
        )
        .route("/windup/analysis/:id/status", get(analysis_status))
        .route("/windup/analysis/:id/execution", get(list_executions))
        .route("/windup/analysis/:id/issues", get(list_issues))
        .route("/windup/analysisSse", get(analysis_events))
        .with_state(state)
}

// =============================================================================
// HEALTH CHECK
// =============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// ANALYSIS HANDLERS
// =============================================================================

/// Submission form. Technologies and packages are comma-separated.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest {
    /// Application already placed on the shared folder.
    application_path: String,
    #[serde(default)]
    application_file_name: Option<String>,
    #[serde(default)]
    sources: Option<String>,
    targets: String,
    #[serde(default)]
    packages: Option<String>,
    #[serde(default)]
    source_mode: bool,
}

impl AnalysisRequest {
    fn into_submission(self) -> Result<Submission, ApiError> {
        let options = RunOptions::from_csv(
            self.sources.as_deref(),
            &self.targets,
            self.packages.as_deref(),
            self.source_mode,
        )?;
        let mut submission = Submission::new(self.application_path, options);
        if let Some(name) = self.application_file_name {
            submission = submission.with_application_file_name(name);
        }
        Ok(submission)
    }
}

async fn create_analysis(
    State(state): State<AppState>,
    Json(body): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<Analysis>), ApiError> {
    let analysis = state
        .service
        .create_analysis(body.into_submission()?)
        .await?;
    Ok((StatusCode::CREATED, Json(analysis)))
}

async fn rerun_analysis(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<Analysis>), ApiError> {
    let analysis = state
        .service
        .rerun_analysis(id, body.into_submission()?)
        .await?;
    Ok((StatusCode::CREATED, Json(analysis)))
}

async fn delete_analysis(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_analysis(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_analyses(State(state): State<AppState>) -> Result<Json<Vec<Analysis>>, ApiError> {
    Ok(Json(state.service.list_analyses().await?))
}

async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Analysis>, ApiError> {
    Ok(Json(state.service.get_analysis(id).await?))
}

async fn analysis_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.service.analysis_status(id).await?;
    Ok(Json(serde_json::json!({ "id": id, "status": status })))
}

async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Run>>, ApiError> {
    Ok(Json(state.service.list_runs(id).await?))
}

async fn list_issues(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    Ok(Json(state.service.issues(id).await?))
}

/// Live progress events, relayed as they are published.
async fn analysis_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state
        .service
        .subscribe()
        .into_stream()
        .map(|data| Ok(Event::default().data(data)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    Internal(tackle_core::Error),
    NotFound(String),
    BadRequest(String),
}

impl From<tackle_core::Error> for ApiError {
    fn from(err: tackle_core::Error) -> Self {
        if err.is_not_found() {
            return ApiError::NotFound(err.to_string());
        }
        match err {
            tackle_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                error!(error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
