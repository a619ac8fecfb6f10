use std::time::SystemTime;

use rand::{Rng, distr::Alphanumeric, rng};
use tracing::{debug, info, warn};

use crate::{
    config::TeacherDisconnectPolicy,
    dao::{models::SessionEntity, session_cache::TeacherClaim},
    dto::{poll::PollHistoryResponse, session::TeacherJoinResponse, ws::HistoryRequest},
    error::ServiceError,
    services::{gateway, poll_service},
    state::{
        ConnectionId, SharedState,
        poll::{CloseReason, Requester},
    },
};

const SESSION_SUFFIX_LENGTH: usize = 9;
const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Claim held by `connection_id`, or [`ServiceError::Unauthorized`].
pub async fn require_claim(
    state: &SharedState,
    connection_id: ConnectionId,
) -> Result<TeacherClaim, ServiceError> {
    match state.cache().teacher().await? {
        Some(claim) if claim.connection_id == connection_id => Ok(claim),
        _ => Err(ServiceError::Unauthorized(
            "only the teacher can perform this action".into(),
        )),
    }
}

/// Make `connection_id` the teacher, resuming the latest active session or opening one.
pub async fn join(
    state: &SharedState,
    connection_id: ConnectionId,
) -> Result<TeacherJoinResponse, ServiceError> {
    let store = state.require_record_store().await?;
    let now = SystemTime::now();

    let session = match store.find_active_session().await? {
        Some(mut session) => {
            session.teacher_connection_id = connection_id;
            session.teacher_joined_at = now;
            session.last_activity_at = now;
            session
        }
        None => {
            let session = SessionEntity::new(generate_session_id(now), connection_id, now);
            info!(session_id = %session.session_id, "opened new session");
            session
        }
    };
    store.save_session(session.clone()).await?;

    let previous = state
        .cache()
        .set_teacher(TeacherClaim {
            connection_id,
            session_id: session.session_id.clone(),
            joined_at: now,
        })
        .await?;
    let replaced_previous = previous.is_some_and(|claim| claim.connection_id != connection_id);
    if replaced_previous {
        info!(connection_id = %connection_id, "teacher claim taken over by a new connection");
    }

    let current_poll = poll_service::current_poll_view(state).await?;
    let roster = state.cache().students().await?;
    info!(
        connection_id = %connection_id,
        session_id = %session.session_id,
        "teacher joined"
    );

    Ok(TeacherJoinResponse::new(
        session.session_id,
        now,
        replaced_previous,
        current_poll,
        &roster,
    ))
}

/// Explicit logout. Returns whether `connection_id` held the claim.
pub async fn leave(state: &SharedState, connection_id: ConnectionId) -> Result<bool, ServiceError> {
    relinquish(state, connection_id).await
}

/// Apply the configured policy after the teacher's connection dropped.
pub async fn handle_disconnect(
    state: &SharedState,
    connection_id: ConnectionId,
) -> Result<bool, ServiceError> {
    relinquish(state, connection_id).await
}

async fn relinquish(
    state: &SharedState,
    connection_id: ConnectionId,
) -> Result<bool, ServiceError> {
    if !state.cache().release_teacher(connection_id).await? {
        return Ok(false);
    }

    let policy = state.config().teacher_disconnect_policy();
    if policy == TeacherDisconnectPolicy::AutoClose {
        if let Some(poll) = state.cache().active_poll().await? {
            poll_service::close_poll(
                state,
                poll.id,
                Requester::System,
                CloseReason::TeacherDisconnected,
            )
            .await?;
        }
    }

    let poll_continues = state.cache().active_poll().await?.is_some();
    gateway::broadcast_teacher_disconnected(state, poll_continues);
    info!(
        connection_id = %connection_id,
        policy = ?policy,
        poll_continues,
        "teacher released the session"
    );
    Ok(true)
}

/// Polls of a session, newest first.
///
/// Without an explicit session id the requester must hold the teacher claim.
/// Storage trouble degrades to an empty list.
pub async fn history(
    state: &SharedState,
    requester: ConnectionId,
    request: HistoryRequest,
) -> Result<PollHistoryResponse, ServiceError> {
    let session_id = match request.session_id {
        Some(session_id) => session_id,
        None => require_claim(state, requester).await?.session_id,
    };
    let limit = request.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let Some(store) = state.record_store().await else {
        warn!(session_id = %session_id, "no record store; returning empty poll history");
        return Ok(PollHistoryResponse::from(Vec::new()));
    };
    match store.list_session_polls(session_id.clone(), limit).await {
        Ok(polls) => Ok(PollHistoryResponse::from(polls)),
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "failed to load poll history");
            Ok(PollHistoryResponse::from(Vec::new()))
        }
    }
}

/// Session the live activity belongs to: the claim's, else the newest active one.
pub async fn current_session_id(state: &SharedState) -> Option<String> {
    match state.cache().teacher().await {
        Ok(Some(claim)) => return Some(claim.session_id),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "failed to read teacher claim"),
    }
    let store = state.record_store().await?;
    match store.find_active_session().await {
        Ok(session) => session.map(|session| session.session_id),
        Err(err) => {
            warn!(error = %err, "failed to look up active session");
            None
        }
    }
}

/// Store the roster size on the current session. Best effort.
pub async fn record_student_count(state: &SharedState, count: usize) {
    let Some(session_id) = current_session_id(state).await else {
        debug!(count, "no session to record student count on");
        return;
    };
    let Some(store) = state.record_store().await else {
        return;
    };
    if let Err(err) = store
        .record_student_count(session_id.clone(), count as u64, SystemTime::now())
        .await
    {
        warn!(session_id = %session_id, error = %err, "failed to record student count");
    }
}

/// `session_<epoch millis>_<9 lowercase alphanumerics>`.
fn generate_session_id(now: SystemTime) -> String {
    let millis = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let suffix: String = rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_SUFFIX_LENGTH)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("session_{millis}_{suffix}")
}
