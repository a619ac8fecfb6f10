use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the live poll backend.
///
/// WebSocket intents and events are not HTTP operations; their payloads are
/// listed as schemas so clients can generate types for them.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::polls::list_polls,
        crate::routes::polls::current_poll,
        crate::routes::polls::poll_history,
        crate::routes::polls::get_poll,
        crate::routes::polls::poll_results,
        crate::routes::students::list_students,
        crate::routes::students::student_stats,
        crate::routes::students::validate_name,
        crate::routes::chat::list_messages,
        crate::routes::chat::chat_stats,
        crate::routes::sessions::session_stats,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::envelope::Envelope,
            crate::dto::envelope::ErrorBody,
            crate::dto::ws::InboundFrame,
            crate::dto::ws::ReplyFrame,
            crate::dto::ws::EventFrame,
            crate::dto::ws::CreatePollRequest,
            crate::dto::ws::EndPollRequest,
            crate::dto::ws::StudentJoinRequest,
            crate::dto::ws::VoteRequest,
            crate::dto::ws::KickStudentRequest,
            crate::dto::ws::HistoryRequest,
            crate::dto::ws::ChatSendRequest,
            crate::dto::ws::ChatHistoryRequest,
            crate::dto::ws::ChatDeleteRequest,
            crate::dto::poll::PollSummary,
            crate::dto::poll::ActivePollView,
            crate::dto::poll::LiveResults,
            crate::dto::poll::CurrentPollView,
            crate::dto::poll::PollCreatedResponse,
            crate::dto::poll::PollEndedEvent,
            crate::dto::poll::TimerUpdate,
            crate::dto::poll::PollHistoryResponse,
            crate::dto::session::TeacherJoinResponse,
            crate::dto::session::TeacherDisconnectedEvent,
            crate::dto::session::SnapshotResponse,
            crate::dto::session::SessionStatsResponse,
            crate::dto::student::StudentView,
            crate::dto::student::RosterUpdate,
            crate::dto::student::StudentPresenceEvent,
            crate::dto::student::StudentJoinResponse,
            crate::dto::student::KickedNotice,
            crate::dto::student::KickResponse,
            crate::dto::student::StudentStats,
            crate::dto::student::NameCheckRequest,
            crate::dto::student::NameCheckResponse,
            crate::dto::chat::ChatMessageView,
            crate::dto::chat::ChatHistoryResponse,
            crate::dto::chat::MessageDeletedEvent,
            crate::dto::chat::ChatStatsResponse,
            crate::dao::models::PollStatus,
            crate::dao::models::SenderType,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "live", description = "WebSocket intents and server events"),
        (name = "polls", description = "Poll history and results"),
        (name = "students", description = "Connected roster"),
        (name = "chat", description = "Session chat"),
        (name = "sessions", description = "Session aggregates"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/ws",
            "/api/polls",
            "/api/polls/{id}/results",
            "/api/students/validate-name",
            "/api/chat/stats/{session_id}",
            "/api/sessions/{session_id}/stats",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path}");
        }
    }
}
