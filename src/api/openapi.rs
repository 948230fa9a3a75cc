//! OpenAPI document for the REST surface.

use utoipa::OpenApi;

use crate::api::dto::{ReportRequest, ReportResponse};
use crate::api::handlers::{report, system};
use crate::error::ErrorResponse;

/// OpenAPI description of every mounted endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "weather-gateway",
        description = "Membership-gated weather reporting API synchronized with an on-chain registry."
    ),
    paths(report::report_weather, system::health_handler),
    components(schemas(ReportRequest, ReportResponse, ErrorResponse, system::HealthResponse)),
    tags(
        (name = "Reports", description = "Signed weather report submission"),
        (name = "System", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_both_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/report-weather"));
        assert!(doc.paths.paths.contains_key("/health"));
    }
}
