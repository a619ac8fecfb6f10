use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Open client connections.
    pub connections: usize,
    /// Countdown timers currently running.
    pub active_timers: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(connections: usize, active_timers: usize) -> Self {
        Self {
            status: "ok".to_string(),
            connections,
            active_timers,
        }
    }

    /// Create a health response indicating the record store is unavailable.
    pub fn degraded(connections: usize, active_timers: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            connections,
            active_timers,
        }
    }
}
