use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Chat messages and moderation payloads.
pub mod chat;
/// Success and failure reply wrapper.
pub mod envelope;
/// Health check payload.
pub mod health;
/// Poll views, live results and countdown ticks.
pub mod poll;
/// Teacher session replies and aggregates.
pub mod session;
/// Roster views and name checks.
pub mod student;
/// Shared field validators.
pub mod validation;
/// WebSocket frames and intent payloads.
pub mod ws;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
