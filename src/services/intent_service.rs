use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    dto::{
        envelope::Envelope,
        session::SnapshotResponse,
        student::RosterUpdate,
        ws::{InboundFrame, Intent, ReplyFrame},
    },
    error::ServiceError,
    services::{
        chat_service,
        gateway::{self, EVENT_POLL_STARTED, EVENT_STUDENTS_UPDATED},
        poll_service, roster_service, teacher_service,
    },
    state::{ConnectionId, SharedState, poll::PollSpec},
};

/// Answer one inbound frame. Every frame gets exactly one reply.
pub async fn handle_frame(
    state: &SharedState,
    connection_id: ConnectionId,
    frame: InboundFrame,
) -> ReplyFrame {
    let result = match Intent::parse(&frame.intent, frame.payload) {
        Ok(intent) => dispatch(state, connection_id, intent).await,
        Err(err) => Err(err),
    };
    if let Err(err) = &result {
        debug!(
            connection_id = %connection_id,
            intent = %frame.intent,
            code = err.code(),
            "intent rejected"
        );
    }

    ReplyFrame {
        request_id: frame.request_id,
        intent: frame.intent,
        envelope: Envelope::from(result),
    }
}

/// Route a decoded intent to the service that owns it.
pub async fn dispatch(
    state: &SharedState,
    connection_id: ConnectionId,
    intent: Intent,
) -> Result<Value, ServiceError> {
    match intent {
        Intent::TeacherJoin => to_data(&teacher_service::join(state, connection_id).await?),
        Intent::TeacherLeave => {
            let released = teacher_service::leave(state, connection_id).await?;
            Ok(json!({ "released": released }))
        }
        Intent::CreatePoll(request) => {
            let spec = PollSpec::try_from(&request)?;
            to_data(&poll_service::create_poll(state, spec, connection_id).await?)
        }
        Intent::EndPoll(request) => {
            to_data(&poll_service::end_poll(state, request.poll_id, connection_id).await?)
        }
        Intent::KickStudent(request) => {
            to_data(&roster_service::kick(state, connection_id, &request.student_name).await?)
        }
        Intent::GetHistory(request) => {
            to_data(&teacher_service::history(state, connection_id, request).await?)
        }
        Intent::StudentJoin(request) => {
            to_data(&roster_service::join(state, connection_id, &request.name).await?)
        }
        Intent::Vote(request) => {
            to_data(&poll_service::submit_vote(state, request, connection_id).await?)
        }
        Intent::StudentActivity => {
            let known = roster_service::touch(state, connection_id).await?;
            Ok(json!({ "active": known }))
        }
        Intent::ChatSend(request) => {
            to_data(&chat_service::send(state, connection_id, request).await?)
        }
        Intent::ChatHistory(request) => to_data(&chat_service::history(state, request.limit).await),
        Intent::ChatDelete(request) => {
            to_data(&chat_service::delete(state, connection_id, request.message_id).await?)
        }
        Intent::Snapshot => to_data(&snapshot(state).await?),
    }
}

/// Everything a client needs to resynchronise: current poll, roster, teacher presence.
pub async fn snapshot(state: &SharedState) -> Result<SnapshotResponse, ServiceError> {
    let current_poll = poll_service::current_poll_view(state).await?;
    let roster = roster_service::roster(state).await?;
    let teacher_present = state.cache().teacher().await?.is_some();

    Ok(SnapshotResponse {
        current_poll,
        roster: RosterUpdate::from(roster.as_slice()),
        teacher_present,
    })
}

/// Push the roster and the running poll to a connection that just opened.
pub async fn on_connect(state: &SharedState, connection_id: ConnectionId) {
    match roster_service::roster(state).await {
        Ok(roster) => {
            gateway::send_event_to(
                state,
                connection_id,
                EVENT_STUDENTS_UPDATED,
                &RosterUpdate::from(roster.as_slice()),
            );
        }
        Err(err) => warn!(connection_id = %connection_id, error = %err, "failed to load roster"),
    }

    match poll_service::current_poll_view(state).await {
        Ok(Some(current)) => {
            gateway::send_event_to(state, connection_id, EVENT_POLL_STARTED, &current.poll);
        }
        Ok(None) => {}
        Err(err) => warn!(connection_id = %connection_id, error = %err, "failed to load current poll"),
    }
}

/// Release whatever the closed connection held: its roster entry and the teacher claim.
pub async fn on_disconnect(state: &SharedState, connection_id: ConnectionId) {
    if let Err(err) = roster_service::leave(state, connection_id).await {
        warn!(connection_id = %connection_id, error = %err, "failed to remove student on disconnect");
    }
    if let Err(err) = teacher_service::handle_disconnect(state, connection_id).await {
        warn!(connection_id = %connection_id, error = %err, "failed to release teacher on disconnect");
    }
}

fn to_data(value: &impl Serialize) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|err| ServiceError::Internal(err.to_string()))
}
