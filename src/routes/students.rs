use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use validator::Validate;

use crate::{
    dto::student::{NameCheckRequest, NameCheckResponse, RosterUpdate, StudentStats},
    error::AppError,
    services::roster_service,
    state::SharedState,
};

/// Roster endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/students", get(list_students))
        .route("/api/students/stats", get(student_stats))
        .route("/api/students/validate-name", post(validate_name))
}

#[utoipa::path(
    get,
    path = "/api/students",
    tag = "students",
    responses((status = 200, description = "Connected students", body = RosterUpdate))
)]
/// List the connected students in join order.
pub async fn list_students(
    State(state): State<SharedState>,
) -> Result<Json<RosterUpdate>, AppError> {
    let roster = roster_service::roster(&state).await?;
    Ok(Json(RosterUpdate::from(roster.as_slice())))
}

#[utoipa::path(
    get,
    path = "/api/students/stats",
    tag = "students",
    responses((status = 200, description = "Vote participation", body = StudentStats))
)]
/// Return how many connected students voted in the active poll.
pub async fn student_stats(
    State(state): State<SharedState>,
) -> Result<Json<StudentStats>, AppError> {
    Ok(Json(roster_service::stats(&state).await?))
}

#[utoipa::path(
    post,
    path = "/api/students/validate-name",
    tag = "students",
    request_body = NameCheckRequest,
    responses(
        (status = 200, description = "Name format and availability", body = NameCheckResponse),
        (status = 400, description = "Malformed request")
    )
)]
/// Check whether a name could be used to join right now.
pub async fn validate_name(
    State(state): State<SharedState>,
    Json(payload): Json<NameCheckRequest>,
) -> Result<Json<NameCheckResponse>, AppError> {
    payload.validate()?;
    Ok(Json(roster_service::check_name(&state, &payload.name).await?))
}
