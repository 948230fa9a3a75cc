//! Weather report DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for `POST /report-weather`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReportRequest {
    /// Address of the reporting member, any case.
    #[schema(example = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")]
    pub address: String,
    /// Opaque report payload.
    #[schema(example = "sunny, 21C")]
    pub report: String,
    /// Hex-encoded 65-byte `r ‖ s ‖ v` signature over `(address, report)`.
    pub signature: String,
}

/// Response body for a stored report.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReportResponse {
    /// Confirmation message.
    #[schema(example = "Weather reported successfully")]
    pub message: String,
}
