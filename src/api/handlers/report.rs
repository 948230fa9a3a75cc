//! Weather report endpoint handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Extension, Json, Router};
use chrono::Utc;

use crate::api::dto::{ReportRequest, ReportResponse};
use crate::api::middleware::{AuthenticatedReport, authenticate, limit_concurrency, rate_limit};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, ServiceError};

/// Confirmation returned for a stored report.
pub const REPORT_ACCEPTED: &str = "Weather reported successfully";

/// `POST /report-weather`: store a signed weather report.
///
/// Runs after the authentication and call-window middleware have passed.
///
/// # Errors
///
/// Returns [`ServiceError::Storage`] if the report cannot be stored.
#[utoipa::path(
    post,
    path = "/report-weather",
    tag = "Reports",
    summary = "Submit a weather report",
    description = "Stores a report signed by a registered member. The signature covers the \
                   EIP-712 message WeatherReport(string address,string report).",
    request_body = ReportRequest,
    responses(
        (status = 200, description = "Report stored", body = ReportResponse),
        (status = 400, description = "Malformed body or signature verification failed", body = ErrorResponse),
        (status = 401, description = "Address unknown or not registered", body = ErrorResponse),
        (status = 429, description = "Too many requests or window passed", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse),
    )
)]
pub async fn report_weather(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedReport>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .report_service
        .ingest(&auth.membership, &auth.report, Utc::now().timestamp())
        .await?;

    Ok((
        StatusCode::OK,
        Json(ReportResponse {
            message: REPORT_ACCEPTED.to_string(),
        }),
    ))
}

/// Report routes. The gate is the outermost layer, the call window the
/// innermost.
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/report-weather",
        post(report_weather)
            .layer(from_fn_with_state(state.clone(), rate_limit))
            .layer(from_fn_with_state(state.clone(), authenticate))
            .layer(from_fn_with_state(state.clone(), limit_concurrency)),
    )
}
