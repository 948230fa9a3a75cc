//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::service::ReportService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Report request path.
    pub report_service: Arc<ReportService>,
    /// Caps the number of report requests in flight.
    pub request_gate: Arc<Semaphore>,
}

impl AppState {
    /// Creates state with `max_concurrent_requests` gate permits (at least one).
    #[must_use]
    pub fn new(report_service: Arc<ReportService>, max_concurrent_requests: usize) -> Self {
        Self {
            report_service,
            request_gate: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }
}
