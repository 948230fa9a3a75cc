//! Service error types with HTTP status code mapping.
//!
//! [`ServiceError`] is the error type of the request path. Each variant
//! maps to one HTTP status code and renders as `{"error": "<message>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::VerificationError;
use crate::domain::RateLimitError;
use crate::persistence::StoreError;

/// JSON body of every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable reason.
    #[schema(example = "Unauthorized")]
    pub error: String,
}

/// Request-path error enum with HTTP status code mapping.
///
/// | Variant          | HTTP Status               |
/// |------------------|---------------------------|
/// | `InvalidRequest` | 400 Bad Request           |
/// | `Verification`   | 400 Bad Request           |
/// | `Unauthorized`   | 401 Unauthorized          |
/// | `RateLimited`    | 429 Too Many Requests     |
/// | `Storage`        | 500 Internal Server Error |
/// | `Internal`       | 500 Internal Server Error |
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The body is not a valid report request. Carries the parser message.
    #[error("Invalid request payload")]
    InvalidRequest(String),

    /// The report signature does not verify.
    #[error("Error in verification")]
    Verification(#[from] VerificationError),

    /// Unknown address or membership not registered.
    #[error("Unauthorized")]
    Unauthorized,

    /// The membership's call window refused the report.
    #[error("{0}")]
    RateLimited(#[from] RateLimitError),

    /// The store failed or no connection was available.
    #[error("{0}")]
    Storage(#[from] StoreError),

    /// Any other server-side failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Verification(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::InvalidRequest(detail) => tracing::debug!(%detail, "rejected report payload"),
            Self::Verification(e) => tracing::debug!(error = %e, "rejected report signature"),
            Self::Storage(_) | Self::Internal(_) => tracing::error!(error = %self, "request failed"),
            Self::Unauthorized | Self::RateLimited(_) => {}
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::connection_pool::PoolError;

    #[test]
    fn status_mapping() {
        let cases = [
            (ServiceError::InvalidRequest("eof".into()), StatusCode::BAD_REQUEST),
            (
                ServiceError::Verification(VerificationError::Recovery("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (ServiceError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ServiceError::RateLimited(RateLimitError::WindowPassed),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ServiceError::Storage(StoreError::Pool(PoolError::Empty)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.status_code(), status, "{error:?}");
        }
    }

    #[test]
    fn messages_are_client_facing() {
        assert_eq!(
            ServiceError::InvalidRequest("missing field".into()).to_string(),
            "Invalid request payload"
        );
        assert_eq!(
            ServiceError::RateLimited(RateLimitError::TooManyRequests).to_string(),
            "Too many requests"
        );
        assert_eq!(
            ServiceError::Storage(StoreError::Pool(PoolError::Empty)).to_string(),
            "connection pool is empty"
        );
    }

    #[test]
    fn into_response_sets_status() {
        let response = ServiceError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
