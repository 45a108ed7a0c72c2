use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use scout_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
///
/// Only request-level failures reach this type; per-item failures travel
/// inside a successful response.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::SearchProviderError(_) => StatusCode::BAD_GATEWAY,
            AppError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = %self.0.kind(), error = %self.0, "Request failed");
        }

        let body = ErrorResponse {
            error: self.0.kind().as_str().to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
