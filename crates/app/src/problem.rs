use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use job_tracker_core::ValidationError;
use job_tracker_storage::StorageError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

/// Failures surfaced by the application endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found")]
    NotFound,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Payload(#[from] JsonRejection),
    #[error(transparent)]
    Path(#[from] PathRejection),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Label used for the `result` dimension of request metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation(_) | Self::Payload(_) | Self::Path(_) => "invalid",
            Self::Storage(_) => "error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem = match self {
            Self::NotFound => ProblemResponse::new(StatusCode::NOT_FOUND, "not_found", "Not found"),
            Self::Validation(err) => {
                ProblemResponse::new(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
            }
            Self::Payload(rejection) => ProblemResponse::new(
                rejection.status(),
                "invalid_payload",
                rejection.body_text(),
            ),
            Self::Path(rejection) => {
                ProblemResponse::new(rejection.status(), "invalid_path", rejection.body_text())
            }
            Self::Storage(err) => {
                error!(stage = "api", error = %err, "storage operation failed");
                ProblemResponse::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "failed to access the application store",
                )
            }
        };
        problem.into_response()
    }
}
