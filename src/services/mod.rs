/// Chat messages: send, history, soft delete and stats.
pub mod chat_service;
/// Periodic housekeeping and the shutdown sequence.
pub mod cleanup_service;
/// One-second countdown timers of active polls.
pub mod countdown;
/// OpenAPI documentation generation.
pub mod documentation;
/// Event names and fan-out helpers over the connection hub.
pub mod gateway;
/// Health check service.
pub mod health_service;
/// Intent dispatch and per-connection resynchronisation.
pub mod intent_service;
/// Poll histories, live results and session aggregates for the REST surface.
pub mod public_service;
/// Poll lifecycle: create, vote, close.
pub mod poll_service;
/// Student roster: join, leave, kick and inactivity.
pub mod roster_service;
/// Record store connection supervision and degraded mode.
pub mod storage_supervisor;
/// Teacher claim and durable session handling.
pub mod teacher_service;
/// WebSocket connection and frame handling service.
pub mod websocket_service;
