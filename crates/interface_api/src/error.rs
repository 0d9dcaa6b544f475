//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use domain_billing::{BillingError, ErrorKind};

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiError {
    /// HTTP status and the machine-readable error type
    pub fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            ApiError::Billing(e) => match e.kind() {
                ErrorKind::Validation => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
                ErrorKind::Selection => (StatusCode::CONFLICT, "selection"),
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                ErrorKind::Concurrency => (StatusCode::CONFLICT, "concurrency"),
                ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Validation(errors.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else if status == StatusCode::CONFLICT {
            warn!(error = %self, "Request conflicted with bill state");
        }

        let message = match &self {
            ApiError::BadRequest(msg) | ApiError::Validation(msg) => msg.clone(),
            ApiError::Billing(e) => e.to_string(),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_billing::SelectionError;

    #[test]
    fn test_billing_error_statuses() {
        let cases = [
            (ApiError::from(BillingError::validation("bad")), StatusCode::UNPROCESSABLE_ENTITY),
            (
                ApiError::from(BillingError::Selection(SelectionError::AlreadySettled { index: 1 })),
                StatusCode::CONFLICT,
            ),
            (ApiError::from(BillingError::BillNotFound("x".into())), StatusCode::NOT_FOUND),
            (ApiError::from(BillingError::concurrency("moved")), StatusCode::CONFLICT),
            (ApiError::from(BillingError::Storage("down".into())), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_and_type().0, expected, "{}", error);
        }
    }
}
