use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::poll::{
        CurrentPollView, LiveResults, PollHistoryQuery, PollHistoryResponse, PollListQuery,
        PollSummary,
    },
    error::AppError,
    services::public_service,
    state::SharedState,
};

/// Read-only poll endpoints: history, the running poll and results.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/polls", get(list_polls))
        .route("/api/polls/current", get(current_poll))
        .route("/api/polls/history", get(poll_history))
        .route("/api/polls/{id}", get(get_poll))
        .route("/api/polls/{id}/results", get(poll_results))
}

#[utoipa::path(
    get,
    path = "/api/polls",
    tag = "polls",
    params(PollListQuery),
    responses((status = 200, description = "Newest polls", body = PollHistoryResponse))
)]
/// List the newest polls across all sessions.
pub async fn list_polls(
    State(state): State<SharedState>,
    Query(query): Query<PollListQuery>,
) -> Json<PollHistoryResponse> {
    Json(public_service::list_polls(&state, query.limit).await)
}

#[utoipa::path(
    get,
    path = "/api/polls/current",
    tag = "polls",
    responses(
        (status = 200, description = "Active poll with live tally", body = CurrentPollView),
        (status = 404, description = "No poll is active")
    )
)]
/// Return the poll currently accepting votes.
pub async fn current_poll(
    State(state): State<SharedState>,
) -> Result<Json<CurrentPollView>, AppError> {
    Ok(Json(public_service::current_poll(&state).await?))
}

#[utoipa::path(
    get,
    path = "/api/polls/history",
    tag = "polls",
    params(PollHistoryQuery),
    responses((status = 200, description = "Polls of the session", body = PollHistoryResponse))
)]
/// List the polls of a session, the current one by default.
pub async fn poll_history(
    State(state): State<SharedState>,
    Query(query): Query<PollHistoryQuery>,
) -> Json<PollHistoryResponse> {
    Json(public_service::poll_history(&state, query).await)
}

#[utoipa::path(
    get,
    path = "/api/polls/{id}",
    tag = "polls",
    params(("id" = Uuid, Path, description = "Poll identifier")),
    responses(
        (status = 200, description = "Poll record", body = PollSummary),
        (status = 404, description = "Unknown poll"),
        (status = 503, description = "Record store unavailable")
    )
)]
/// Fetch one durable poll record.
pub async fn get_poll(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PollSummary>, AppError> {
    Ok(Json(public_service::find_poll(&state, id).await?))
}

#[utoipa::path(
    get,
    path = "/api/polls/{id}/results",
    tag = "polls",
    params(("id" = Uuid, Path, description = "Poll identifier")),
    responses(
        (status = 200, description = "Live or final results", body = LiveResults),
        (status = 404, description = "Unknown poll")
    )
)]
/// Return the live tally of the running poll or the frozen results of an ended one.
pub async fn poll_results(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LiveResults>, AppError> {
    Ok(Json(public_service::poll_results(&state, id).await?))
}
