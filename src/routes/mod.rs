use axum::Router;

use crate::state::SharedState;

/// Chat history and stats.
pub mod chat;
/// Swagger UI and the OpenAPI document.
pub mod docs;
/// Liveness and storage health.
pub mod health;
/// Poll lists, current poll and results.
pub mod polls;
/// Session aggregates.
pub mod sessions;
/// Roster, stats and name checks.
pub mod students;
/// The `/ws` upgrade.
pub mod websocket;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(websocket::router())
        .merge(polls::router())
        .merge(students::router())
        .merge(chat::router())
        .merge(sessions::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
