use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Redirect},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use services::services::{
    plan_generator::editing_tools,
    reel::JobError,
    reel_jobs::{JobStatus, ReelRequest, RenderJob},
};
use uuid::Uuid;

use crate::{AppState, error::ApiError, middleware::RequestId};

/// Client-facing projection of a [`RenderJob`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub output_urls: Vec<String>,
    pub errors: Vec<JobError>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<RenderJob> for JobView {
    fn from(job: RenderJob) -> Self {
        Self {
            output_urls: job.output_urls(),
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.progress_message,
            errors: job.errors,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/video/process", post(process_video))
        .route("/video/status/{job_id}", get(job_status))
        .route("/video/jobs", get(list_jobs))
        .route("/video/jobs/{job_id}", axum::routing::delete(delete_job))
        .route("/video/jobs/{job_id}/cancel", post(cancel_job))
        .route("/video/download/{job_id}", get(download))
        .route("/video/tools", get(tools))
}

/// Unknown and unparseable ids are both "not found".
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("Job not found: {}", raw)))
}

fn find_job(state: &AppState, raw: &str) -> Result<RenderJob, ApiError> {
    let id = parse_job_id(raw)?;
    state
        .jobs
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", id)))
}

pub async fn process_video(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<ReelRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.clips.is_empty() {
        return Err(ApiError::BadRequest("No clips provided".to_string()));
    }

    let clip_count = request.clips.len();
    let job_id = state.jobs.submit(request)?;
    tracing::info!(
        request_id = request_id.as_str(),
        "Accepted reel job {} with {} clips",
        job_id,
        clip_count
    );

    Ok((
        StatusCode::ACCEPTED,
        ResponseJson(json!({ "jobId": job_id, "status": "processing" })),
    ))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<ResponseJson<JobView>, ApiError> {
    Ok(ResponseJson(find_job(&state, &job_id)?.into()))
}

pub async fn list_jobs(State(state): State<AppState>) -> ResponseJson<Vec<JobView>> {
    ResponseJson(state.jobs.list().into_iter().map(JobView::from).collect())
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<ResponseJson<Value>, ApiError> {
    let id = parse_job_id(&job_id)?;
    if !state.jobs.delete(id) {
        return Err(ApiError::NotFound(format!("Job not found: {}", id)));
    }
    tracing::info!("Deleted reel job {}", id);
    Ok(ResponseJson(json!({ "success": true })))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<ResponseJson<Value>, ApiError> {
    let id = parse_job_id(&job_id)?;
    state.jobs.cancel(id)?;
    Ok(ResponseJson(json!({ "success": true })))
}

pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Redirect, ApiError> {
    let job = find_job(&state, &job_id)?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::BadRequest(format!(
            "Job is {}, not completed",
            job.status.as_str()
        )));
    }
    match job.outputs.first() {
        Some(output) => Ok(Redirect::temporary(&output.url)),
        None => Err(ApiError::BadRequest("Job has no outputs".to_string())),
    }
}

pub async fn tools() -> ResponseJson<Value> {
    ResponseJson(editing_tools())
}
