//! Middleware stages of the report route.
//!
//! The route runs `limit_concurrency → authenticate → rate_limit → handler`.
//! Any stage may short-circuit with a [`ServiceError`] response.

use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

use crate::api::dto::ReportRequest;
use crate::app_state::AppState;
use crate::domain::Membership;
use crate::error::ServiceError;

/// Largest report body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Attached to the request once the signature and membership check out.
#[derive(Debug, Clone)]
pub struct AuthenticatedReport {
    /// Registered membership behind the signer.
    pub membership: Membership,
    /// Report payload to ingest.
    pub report: String,
}

/// Holds a request-gate permit for the lifetime of the request.
///
/// # Errors
///
/// Returns [`ServiceError::Internal`] if the gate has been closed.
pub async fn limit_concurrency(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ServiceError> {
    let _permit = Arc::clone(&state.request_gate)
        .acquire_owned()
        .await
        .map_err(|_| ServiceError::Internal("request gate closed".to_string()))?;
    Ok(next.run(request).await)
}

/// Parses the report body, verifies its signature, and requires a
/// registered membership for the signer.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidRequest`] for an unreadable body and
/// whatever [`crate::service::ReportService::authenticate`] reports.
pub async fn authenticate(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ServiceError> {
    let (parts, body) = request.into_parts();
    let bytes = body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
    let payload: ReportRequest =
        serde_json::from_slice(&bytes).map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;

    let membership = state
        .report_service
        .authenticate(&payload.address, &payload.report, &payload.signature)
        .await?;

    let mut request = Request::from_parts(parts, Body::empty());
    request.extensions_mut().insert(AuthenticatedReport {
        membership,
        report: payload.report,
    });
    Ok(next.run(request).await)
}

/// Applies the membership's call window at the current time.
///
/// # Errors
///
/// Returns [`ServiceError::Unauthorized`] if the request was not
/// authenticated and [`ServiceError::RateLimited`] if the window refuses.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ServiceError> {
    let auth = request
        .extensions()
        .get::<AuthenticatedReport>()
        .ok_or(ServiceError::Unauthorized)?;
    state
        .report_service
        .check_call_window(&auth.membership, Utc::now().timestamp())?;
    Ok(next.run(request).await)
}
