use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::session_cache::Student,
    dto::{
        chat::{ChatMessageView, MessageDeletedEvent},
        poll::{ActivePollView, LiveResults, PollEndedEvent, TimerUpdate},
        session::TeacherDisconnectedEvent,
        student::{KickedNotice, RosterUpdate, StudentPresenceEvent, StudentView},
        ws::EventFrame,
    },
    state::{ConnectionId, Outbound, SharedState},
};

/// A poll opened.
pub const EVENT_POLL_STARTED: &str = "poll:started";
/// A poll closed, with its final results.
pub const EVENT_POLL_ENDED: &str = "poll:ended";
/// Live tally after an accepted vote.
pub const EVENT_POLL_RESULTS: &str = "poll:results";
/// One countdown second elapsed.
pub const EVENT_TIMER_UPDATE: &str = "timer:update";
/// Roster changed.
pub const EVENT_STUDENTS_UPDATED: &str = "students:updated";
/// A student joined.
pub const EVENT_STUDENT_JOINED: &str = "student:joined";
/// A student left or was removed.
pub const EVENT_STUDENT_LEFT: &str = "student:left";
/// Sent only to a removed student, right before disconnect.
pub const EVENT_STUDENT_KICKED: &str = "student:kicked";
/// New chat message.
pub const EVENT_CHAT_MESSAGE: &str = "chat:message";
/// A chat message was hidden.
pub const EVENT_CHAT_MESSAGE_DELETED: &str = "chat:message_deleted";
/// The teacher connection went away.
pub const EVENT_TEACHER_DISCONNECTED: &str = "teacher:disconnected";

const KICK_REASON: &str = "Removed by teacher";
const TEACHER_DISCONNECTED_MESSAGE: &str = "Teacher disconnected. The session continues in view-only mode.";

/// Announce a freshly opened poll.
pub fn broadcast_poll_started(state: &SharedState, poll: &ActivePollView) {
    send_to_all(state, EVENT_POLL_STARTED, poll);
}

/// Push the live tally after a vote.
pub fn broadcast_poll_results(state: &SharedState, results: &LiveResults) {
    send_to_all(state, EVENT_POLL_RESULTS, results);
}

/// Announce a closed poll with its frozen results.
pub fn broadcast_poll_ended(state: &SharedState, ended: &PollEndedEvent) {
    send_to_all(state, EVENT_POLL_ENDED, ended);
}

/// Push one countdown tick.
pub fn broadcast_timer_update(state: &SharedState, poll_id: Uuid, seconds_remaining: u64) {
    let payload = TimerUpdate {
        poll_id,
        seconds_remaining,
    };
    send_to_all(state, EVENT_TIMER_UPDATE, &payload);
}

/// Push the roster to everyone, or everyone but `excluded`.
pub fn broadcast_roster(state: &SharedState, roster: &[Student], excluded: Option<ConnectionId>) {
    let payload = RosterUpdate::from(roster);
    match excluded {
        Some(id) => send_to_all_except(state, id, EVENT_STUDENTS_UPDATED, &payload),
        None => send_to_all(state, EVENT_STUDENTS_UPDATED, &payload),
    }
}

/// Announce a student who just joined, with the roster that includes them.
pub fn broadcast_student_joined(state: &SharedState, student: &Student, roster: &[Student]) {
    let payload = StudentPresenceEvent {
        student: StudentView::from(student),
        roster: RosterUpdate::from(roster),
    };
    send_to_all(state, EVENT_STUDENT_JOINED, &payload);
}

/// Announce a student who left, with the roster that no longer includes them.
pub fn broadcast_student_left(state: &SharedState, student: &Student, roster: &[Student]) {
    let payload = StudentPresenceEvent {
        student: StudentView::from(student),
        roster: RosterUpdate::from(roster),
    };
    send_to_all(state, EVENT_STUDENT_LEFT, &payload);
}

/// Tell a removed student why, on their own connection only.
pub fn notify_kicked(state: &SharedState, connection_id: ConnectionId) -> bool {
    let payload = KickedNotice {
        reason: KICK_REASON.to_string(),
    };
    send_event_to(state, connection_id, EVENT_STUDENT_KICKED, &payload)
}

/// Close `connection_id` once `grace` has elapsed, so queued frames reach it first.
pub fn schedule_disconnect(state: &SharedState, connection_id: ConnectionId, grace: Duration) {
    let state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if state.hub().disconnect(connection_id) {
            debug!(connection_id = %connection_id, "closed connection after grace delay");
        }
    });
}

/// Relay a stored chat message.
pub fn broadcast_chat_message(state: &SharedState, message: &ChatMessageView) {
    send_to_all(state, EVENT_CHAT_MESSAGE, message);
}

/// Announce a soft-deleted chat message.
pub fn broadcast_message_deleted(state: &SharedState, message_id: Uuid, deleted_by: &str) {
    let payload = MessageDeletedEvent {
        message_id,
        deleted_by: deleted_by.to_string(),
    };
    send_to_all(state, EVENT_CHAT_MESSAGE_DELETED, &payload);
}

/// Tell participants the teacher is gone and whether the active poll keeps running.
pub fn broadcast_teacher_disconnected(state: &SharedState, poll_continues: bool) {
    let payload = TeacherDisconnectedEvent {
        message: TEACHER_DISCONNECTED_MESSAGE.to_string(),
        poll_continues,
    };
    send_to_all(state, EVENT_TEACHER_DISCONNECTED, &payload);
}

/// Queue one event for a single connection. Returns whether it was accepted.
pub fn send_event_to(
    state: &SharedState,
    connection_id: ConnectionId,
    event: &str,
    payload: &impl Serialize,
) -> bool {
    match EventFrame::json(event, payload) {
        Ok(frame) => state
            .hub()
            .send_to_one(connection_id, Outbound::Event(frame)),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize event payload");
            false
        }
    }
}

fn send_to_all(state: &SharedState, event: &str, payload: &impl Serialize) {
    match EventFrame::json(event, payload) {
        Ok(frame) => {
            state.hub().broadcast_to_all(frame);
        }
        Err(err) => warn!(event, error = %err, "failed to serialize event payload"),
    }
}

fn send_to_all_except(
    state: &SharedState,
    excluded: ConnectionId,
    event: &str,
    payload: &impl Serialize,
) {
    match EventFrame::json(event, payload) {
        Ok(frame) => {
            state.hub().broadcast_except(excluded, frame);
        }
        Err(err) => warn!(event, error = %err, "failed to serialize event payload"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::{config::AppConfig, state::AppState};

    fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Outbound>) -> EventFrame {
        match rx.try_recv() {
            Ok(Outbound::Event(frame)) => frame,
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn roster_update_skips_excluded_connection() {
        let state = AppState::new(AppConfig::default());
        let kept = Uuid::new_v4();
        let excluded = Uuid::new_v4();
        let mut kept_rx = state.hub().register(kept);
        let mut excluded_rx = state.hub().register(excluded);

        let roster = vec![Student::new(kept, "Alice".into(), SystemTime::now())];
        broadcast_roster(&state, &roster, Some(excluded));

        let frame = next_event(&mut kept_rx);
        assert_eq!(frame.event, EVENT_STUDENTS_UPDATED);
        assert_eq!(frame.data["count"], 1);
        assert!(excluded_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn kicked_notice_reaches_target_only() {
        let state = AppState::new(AppConfig::default());
        let target = Uuid::new_v4();
        let bystander = Uuid::new_v4();
        let mut target_rx = state.hub().register(target);
        let mut bystander_rx = state.hub().register(bystander);

        assert!(notify_kicked(&state, target));

        let frame = next_event(&mut target_rx);
        assert_eq!(frame.event, EVENT_STUDENT_KICKED);
        assert_eq!(frame.data["reason"], KICK_REASON);
        assert!(bystander_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_waits_for_grace() {
        let state = AppState::new(AppConfig::default());
        let target = Uuid::new_v4();
        let mut rx = state.hub().register(target);

        schedule_disconnect(&state, target, Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(state.hub().is_connected(target));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!state.hub().is_connected(target));
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }
}
