use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ControllerError;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

fn controller_status(error: &ControllerError) -> StatusCode {
    match error {
        ControllerError::StatementTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ControllerError::DatabaseUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ControllerError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
        ControllerError::AlreadyExists(_) => StatusCode::CONFLICT,
        ControllerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ControllerError::Internal(_)
        | ControllerError::InvalidPlan(_)
        | ControllerError::Postgres(_)
        | ControllerError::MySql(_)
        | ControllerError::DataFusion(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Controller(err) => {
                let status = controller_status(&err);
                let mut detail = ErrorDetail::new(err.code(), err.to_string());
                if let ControllerError::Unsupported { backend, operation } = &err {
                    detail = detail.with_details(format!("backend={} operation={}", backend, operation));
                }
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("Controller error: {}", err);
                }
                (status, detail)
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatabaseKind, Operation};

    #[test]
    fn test_error_response_format() {
        let error = AppError::NotFound("Controller not found".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_controller_error_statuses() {
        let cases = [
            (ControllerError::StatementTimeout("t".into()), StatusCode::GATEWAY_TIMEOUT),
            (ControllerError::DatabaseUnavailable("d".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                ControllerError::unsupported(DatabaseKind::MySql, Operation::SetHint),
                StatusCode::NOT_IMPLEMENTED,
            ),
            (ControllerError::AlreadyExists("idx".into()), StatusCode::CONFLICT),
            (ControllerError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (ControllerError::Internal("closed".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).into_response().status(), status);
        }
    }

    #[test]
    fn test_error_detail_creation() {
        let detail = ErrorDetail::new("TEST_CODE", "Test message").with_details("more");
        assert_eq!(detail.code, "TEST_CODE");
        assert_eq!(detail.message, "Test message");
        assert_eq!(detail.details.as_deref(), Some("more"));
    }
}
