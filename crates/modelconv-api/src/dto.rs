//! Response DTOs.

use modelconv_pipeline::metrics::MetricsSnapshot;
use serde::Serialize;

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Liveness response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Status.
    pub status: String,
    /// Version.
    pub version: String,
    /// Uptime.
    pub uptime_seconds: u64,
}

/// Pipeline metrics response.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    /// Whether the converter program can be found.
    pub converter_available: bool,
    /// Free converter slots.
    pub available_slots: usize,
    /// Counters.
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}
