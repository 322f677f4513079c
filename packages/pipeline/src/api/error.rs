//! HTTP error mapping: pipeline failure classes to status codes.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use tracing::error;

use crate::error::PipelineError;

pub struct ApiError {
    status: Option<StatusCode>,
    source: anyhow::Error,
}

impl ApiError {
    /// A lookup miss. Distinct from `Validation` (the request was well
    /// formed, the thing just is not there), so it maps to 404.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: Some(StatusCode::NOT_FOUND),
            source: anyhow::anyhow!(message.into()),
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self {
            status: None,
            source: err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status.unwrap_or_else(|| {
            match self.source.downcast_ref::<PipelineError>() {
                Some(PipelineError::Validation(_)) => StatusCode::BAD_REQUEST,
                Some(PipelineError::Authentication(_)) => StatusCode::UNAUTHORIZED,
                Some(PipelineError::Throttling(_)) => StatusCode::TOO_MANY_REQUESTS,
                Some(PipelineError::Resource(_)) | Some(PipelineError::Network(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        });

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = ?self.source, "request failed");
        }

        (status, Json(json!({ "error": self.source.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_misses_map_to_404() {
        let response = ApiError::not_found("batch xyz not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn failure_classes_map_to_their_status_codes() {
        let cases = [
            (PipelineError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                PipelineError::Authentication("nope".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                PipelineError::Throttling("slow down".into()),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                PipelineError::Resource("db down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
