use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    response::Json as ResponseJson,
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};
use services::services::{
    beat_analysis::AudioAnalysis,
    plan_generator::{HeuristicPlanner, PlanRequest, ReelStyle},
    reel::{AspectRatio, MediaReference, plan_builder::lint_plan},
    reel_jobs::DEFAULT_TARGET_DURATION,
};

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    #[serde(default)]
    pub clips: Vec<MediaReference>,
    #[serde(default)]
    pub audio: Option<MediaReference>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub target_duration: Option<f64>,
    #[serde(default)]
    pub target_style: Option<ReelStyle>,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineRequest {
    #[serde(default)]
    pub current_plan: Value,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub audio: Option<MediaReference>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub plan: Value,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ai/edit", post(edit))
        .route("/ai/refine", post(refine))
        .route("/ai/validate", post(validate))
}

/// Best-effort beat analysis; a plan without beats is still a plan.
async fn analyze_music(state: &AppState, audio: Option<&MediaReference>) -> Option<AudioAnalysis> {
    let audio = audio?;
    match state.jobs.analyzer().analyze(&audio.path).await {
        Ok(analysis) => Some(analysis),
        Err(e) => {
            tracing::warn!("Audio analysis for {} failed: {}", audio.path.display(), e);
            None
        }
    }
}

pub async fn edit(
    State(state): State<AppState>,
    payload: Result<Json<EditRequest>, JsonRejection>,
) -> Result<ResponseJson<Value>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if payload.clips.is_empty() {
        return Err(ApiError::BadRequest("No clips provided".to_string()));
    }

    let analysis = analyze_music(&state, payload.audio.as_ref()).await;
    let request = PlanRequest {
        clips: payload.clips,
        audio: payload.audio,
        analysis,
        prompt: payload.prompt,
        target_duration: payload
            .target_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(DEFAULT_TARGET_DURATION),
        style: payload.target_style.unwrap_or_default(),
        aspect_ratio: payload.aspect_ratio.unwrap_or_default(),
    };

    let planner = state.jobs.planner();
    let (plan, generator) = match planner.generate(&request).await {
        Ok(plan) => (plan, planner.name()),
        Err(e) => {
            tracing::warn!("{} failed, using heuristic plan: {}", planner.name(), e);
            (HeuristicPlanner.plan(&request), "heuristic")
        }
    };

    Ok(ResponseJson(json!({
        "plan": plan,
        "generator": generator,
        "warnings": lint_plan(&plan),
    })))
}

pub async fn refine(
    State(state): State<AppState>,
    payload: Result<Json<RefineRequest>, JsonRejection>,
) -> Result<ResponseJson<Value>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if !(payload.current_plan.is_object() || payload.current_plan.is_array()) {
        return Err(ApiError::BadRequest(
            "currentPlan must be a JSON object or array".to_string(),
        ));
    }
    if payload.feedback.trim().is_empty() {
        return Err(ApiError::BadRequest("feedback is required".to_string()));
    }

    let analysis = analyze_music(&state, payload.audio.as_ref()).await;
    let plan = state
        .jobs
        .planner()
        .refine(&payload.current_plan, payload.feedback.trim(), analysis.as_ref())
        .await?;

    Ok(ResponseJson(json!({ "plan": plan })))
}

pub async fn validate(
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<ResponseJson<Value>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let errors = lint_plan(&payload.plan);
    Ok(ResponseJson(json!({
        "valid": errors.is_empty(),
        "errors": errors,
    })))
}
