use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};

use crate::{
    dto::chat::{ChatHistoryResponse, ChatListQuery, ChatStatsResponse},
    services::chat_service,
    state::SharedState,
};

/// Chat read endpoints. Sending and deleting go through the WebSocket.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/chat/messages", get(list_messages))
        .route("/api/chat/stats/{session_id}", get(chat_stats))
}

#[utoipa::path(
    get,
    path = "/api/chat/messages",
    tag = "chat",
    params(ChatListQuery),
    responses((status = 200, description = "Messages of the current session", body = ChatHistoryResponse))
)]
/// List the current session's messages, oldest first.
pub async fn list_messages(
    State(state): State<SharedState>,
    Query(query): Query<ChatListQuery>,
) -> Json<ChatHistoryResponse> {
    Json(chat_service::history(&state, query.limit).await)
}

#[utoipa::path(
    get,
    path = "/api/chat/stats/{session_id}",
    tag = "chat",
    params(("session_id" = String, Path, description = "Session identifier")),
    responses((status = 200, description = "Message counts", body = ChatStatsResponse))
)]
/// Count a session's messages by sender type.
pub async fn chat_stats(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Json<ChatStatsResponse> {
    Json(chat_service::stats(&state, session_id).await)
}
