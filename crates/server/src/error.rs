use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use services::services::{
    plan_generator::PlanGeneratorError,
    reel::ReelError,
    reel_jobs::ReelJobError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Reel(#[from] ReelError),
    #[error(transparent)]
    ReelJob(#[from] ReelJobError),
    #[error(transparent)]
    PlanGenerator(#[from] PlanGeneratorError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Internal Server Error: {0}")]
    InternalError(String),
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Reel(err) => match err {
                ReelError::InvalidPlan(_) => (StatusCode::BAD_REQUEST, "InvalidPlan"),
                ReelError::MediaUnavailable(_) => (StatusCode::BAD_REQUEST, "MediaUnavailable"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ReelError"),
            },
            ApiError::ReelJob(err) => match err {
                ReelJobError::JobNotFound(_) => (StatusCode::NOT_FOUND, "JobNotFound"),
                ReelJobError::AlreadyFinished(_) => (StatusCode::CONFLICT, "JobFinished"),
                ReelJobError::Reel(ReelError::InvalidPlan(_)) => {
                    (StatusCode::BAD_REQUEST, "InvalidPlan")
                }
                ReelJobError::Reel(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ReelError"),
            },
            ApiError::PlanGenerator(err) => match err {
                PlanGeneratorError::NotConfigured(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "PlannerNotConfigured")
                }
                PlanGeneratorError::InvalidResponse(_) => {
                    (StatusCode::BAD_GATEWAY, "PlannerInvalidResponse")
                }
                _ => (StatusCode::BAD_GATEWAY, "PlannerError"),
            },
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IoError"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = self.status();

        // Plain variants carry a client-facing message; the rest show their Display text.
        let error_message = match &self {
            ApiError::Conflict(msg)
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::InternalError(msg) => msg.clone(),
            other => other.to_string(),
        };

        if status_code.is_server_error() {
            tracing::error!("{}: {}", error_type, error_message);
        } else {
            tracing::debug!("{}: {}", error_type, error_message);
        }

        (status_code, Json(json!({ "error": error_message }))).into_response()
    }
}
