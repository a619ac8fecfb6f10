use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::session::SessionStatsResponse, error::AppError, services::public_service,
    state::SharedState,
};

/// Session aggregate endpoints.
pub fn router() -> Router<SharedState> {
    Router::new().route("/api/sessions/{session_id}/stats", get(session_stats))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{session_id}/stats",
    tag = "sessions",
    params(("session_id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session aggregates", body = SessionStatsResponse),
        (status = 404, description = "Unknown session"),
        (status = 503, description = "Record store unavailable")
    )
)]
/// Aggregate a session's polls, votes and participation.
pub async fn session_stats(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatsResponse>, AppError> {
    Ok(Json(public_service::session_stats(&state, session_id).await?))
}
