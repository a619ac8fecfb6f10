//! Frames exchanged over the `/ws` socket.
//!
//! Clients send `{"requestId": "...", "intent": "student:vote", "payload": {...}}`.
//! The server answers with a reply frame carrying the same `requestId` and an
//! [`Envelope`], and pushes event frames `{"event": "poll:results", "data": {...}}`.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{dao::models::SenderType, dto::envelope::Envelope, error::ServiceError};

/// Claim the teacher role and resume or open a session.
pub const INTENT_TEACHER_JOIN: &str = "teacher:join";
/// Give up the teacher role.
pub const INTENT_TEACHER_LEAVE: &str = "teacher:leave";
/// Start a poll.
pub const INTENT_CREATE_POLL: &str = "teacher:create_poll";
/// End the active poll early.
pub const INTENT_END_POLL: &str = "teacher:end_poll";
/// Remove a student from the roster.
pub const INTENT_KICK_STUDENT: &str = "teacher:kick_student";
/// List past polls of the session.
pub const INTENT_GET_HISTORY: &str = "teacher:get_history";
/// Join the roster under a display name.
pub const INTENT_STUDENT_JOIN: &str = "student:join";
/// Vote in the active poll.
pub const INTENT_VOTE: &str = "student:vote";
/// Heartbeat that keeps a student from being swept as idle.
pub const INTENT_STUDENT_ACTIVITY: &str = "student:activity";
/// Post a chat message.
pub const INTENT_CHAT_SEND: &str = "chat:send_message";
/// Fetch recent chat messages.
pub const INTENT_CHAT_HISTORY: &str = "chat:get_history";
/// Hide a chat message (teacher only).
pub const INTENT_CHAT_DELETE: &str = "chat:delete_message";
/// Resynchronise poll, roster and teacher presence.
pub const INTENT_SNAPSHOT: &str = "session:snapshot";

/// Frame received from a client.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    /// Correlation id echoed in the reply.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Intent name such as `student:vote`.
    pub intent: String,
    /// Intent-specific payload.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Value,
}

impl InboundFrame {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Payload of `teacher:create_poll`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreatePollRequest {
    /// Question shown to students.
    #[validate(length(min = 1, max = 500))]
    pub question: String,
    /// Answer labels in ballot order.
    #[validate(length(min = 2, max = 6))]
    pub options: Vec<String>,
    /// Seconds; defaults to 60.
    #[validate(range(min = 10, max = 300))]
    pub duration: Option<u32>,
}

/// Payload of `student:join`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct StudentJoinRequest {
    /// Display name; must be unique among connected students.
    #[validate(length(min = 1, max = 50))]
    pub name: String,
}

/// Payload of `student:vote`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    /// Poll being voted in; must be the active one.
    pub poll_id: Uuid,
    /// Chosen answer label.
    #[serde(alias = "selectedOption")]
    #[validate(length(min = 1, max = 100))]
    pub option: String,
    /// Name the voter joined with.
    #[validate(length(min = 1, max = 50))]
    pub student_name: String,
}

/// Payload of `teacher:end_poll`. Without an id the active poll is ended.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndPollRequest {
    /// Poll to end.
    pub poll_id: Option<Uuid>,
}

/// Payload of `teacher:kick_student`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KickStudentRequest {
    /// Name of the student to remove.
    #[validate(length(min = 1, max = 50))]
    pub student_name: String,
}

/// Payload of `teacher:get_history`.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    /// Session to list; defaults to the teacher's session.
    pub session_id: Option<String>,
    /// Maximum number of polls.
    #[validate(range(min = 1, max = 50))]
    pub limit: Option<usize>,
}

/// Payload of `chat:send_message`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendRequest {
    /// Message text; markup is stripped.
    #[validate(length(min = 1, max = 500))]
    pub message: String,
    /// Display name of the author.
    #[validate(length(min = 1, max = 50))]
    pub sender: String,
    /// Role the author claims.
    pub sender_type: SenderType,
}

/// Payload of `chat:get_history`.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct ChatHistoryRequest {
    /// Maximum number of messages.
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<usize>,
}

/// Payload of `chat:delete_message`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatDeleteRequest {
    /// Message to hide.
    pub message_id: Uuid,
}

/// A decoded and boundary-validated client intent.
#[derive(Debug, Clone)]
pub enum Intent {
    /// `teacher:join`.
    TeacherJoin,
    /// `teacher:leave`.
    TeacherLeave,
    /// `teacher:create_poll`.
    CreatePoll(CreatePollRequest),
    /// `teacher:end_poll`.
    EndPoll(EndPollRequest),
    /// `teacher:kick_student`.
    KickStudent(KickStudentRequest),
    /// `teacher:get_history`.
    GetHistory(HistoryRequest),
    /// `student:join`.
    StudentJoin(StudentJoinRequest),
    /// `student:vote`.
    Vote(VoteRequest),
    /// `student:activity`.
    StudentActivity,
    /// `chat:send_message`.
    ChatSend(ChatSendRequest),
    /// `chat:get_history`.
    ChatHistory(ChatHistoryRequest),
    /// `chat:delete_message`.
    ChatDelete(ChatDeleteRequest),
    /// `session:snapshot`.
    Snapshot,
}

impl Intent {
    /// Decode the payload for `name`, rejecting malformed input before it reaches the core.
    pub fn parse(name: &str, payload: Value) -> Result<Self, ServiceError> {
        let intent = match name {
            INTENT_TEACHER_JOIN => Intent::TeacherJoin,
            INTENT_TEACHER_LEAVE => Intent::TeacherLeave,
            INTENT_CREATE_POLL => Intent::CreatePoll(
                decode(payload).map_err(|err| ServiceError::InvalidPollSpec(err.to_string()))?,
            ),
            INTENT_END_POLL => Intent::EndPoll(decode_or_default(payload)?),
            INTENT_KICK_STUDENT => Intent::KickStudent(decode(payload)?),
            INTENT_GET_HISTORY => Intent::GetHistory(decode_or_default(payload)?),
            INTENT_STUDENT_JOIN => Intent::StudentJoin(
                decode(payload).map_err(|err| ServiceError::InvalidNameFormat(err.to_string()))?,
            ),
            INTENT_VOTE => Intent::Vote(decode(payload)?),
            INTENT_STUDENT_ACTIVITY => Intent::StudentActivity,
            INTENT_CHAT_SEND => Intent::ChatSend(decode(payload)?),
            INTENT_CHAT_HISTORY => Intent::ChatHistory(decode_or_default(payload)?),
            INTENT_CHAT_DELETE => Intent::ChatDelete(decode(payload)?),
            INTENT_SNAPSHOT => Intent::Snapshot,
            other => {
                return Err(ServiceError::InvalidInput(format!(
                    "unknown intent `{other}`"
                )));
            }
        };
        Ok(intent)
    }
}

/// Why a payload was rejected at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// JSON did not match the payload shape.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Shape was right but a field is out of bounds.
    #[error("{0}")]
    Invalid(#[from] ValidationErrors),
}

impl From<PayloadError> for ServiceError {
    fn from(err: PayloadError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

fn decode<T: DeserializeOwned + Validate>(payload: Value) -> Result<T, PayloadError> {
    let value: T = serde_json::from_value(payload)?;
    value.validate()?;
    Ok(value)
}

fn decode_or_default<T: DeserializeOwned + Validate + Default>(
    payload: Value,
) -> Result<T, PayloadError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    decode(payload)
}

/// Event pushed to one or many connections.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EventFrame {
    /// Event name such as `poll:results`.
    pub event: String,
    /// Event payload.
    #[schema(value_type = Object)]
    pub data: Value,
}

impl EventFrame {
    /// Build an event frame from any serializable payload.
    pub fn json<T: Serialize>(event: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.to_string(),
            data: serde_json::to_value(payload)?,
        })
    }
}

/// Reply to one inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplyFrame {
    /// Correlation id copied from the inbound frame.
    pub request_id: Option<String>,
    /// Intent being answered.
    pub intent: String,
    /// Outcome of the intent.
    #[serde(flatten)]
    pub envelope: Envelope,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn vote_accepts_selected_option_alias() {
        let intent = Intent::parse(
            INTENT_VOTE,
            json!({
                "pollId": "6f1c1f0e-4a2b-4b8e-9a43-0c1d2e3f4a5b",
                "selectedOption": "Red",
                "studentName": "Alice"
            }),
        )
        .unwrap();
        match intent {
            Intent::Vote(vote) => {
                assert_eq!(vote.option, "Red");
                assert_eq!(vote.student_name, "Alice");
            }
            other => panic!("unexpected intent {other:?}"),
        }
    }

    #[test]
    fn create_poll_bounds_are_enforced_at_the_boundary() {
        let err = Intent::parse(
            INTENT_CREATE_POLL,
            json!({"question": "Q?", "options": ["only one"], "duration": 30}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_POLL_SPEC");

        let err = Intent::parse(
            INTENT_CREATE_POLL,
            json!({"question": "Q?", "options": ["A", "B"], "duration": 5}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_POLL_SPEC");
    }

    #[test]
    fn optional_payloads_default_when_missing() {
        let intent = Intent::parse(INTENT_GET_HISTORY, Value::Null).unwrap();
        assert!(matches!(intent, Intent::GetHistory(HistoryRequest { limit: None, .. })));
    }

    #[test]
    fn unknown_intent_is_invalid_input() {
        let err = Intent::parse("teacher:dance", Value::Null).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn reply_frame_flattens_envelope() {
        let frame = ReplyFrame {
            request_id: Some("r1".into()),
            intent: INTENT_END_POLL.into(),
            envelope: Envelope::success(json!({"ok": true})),
        };
        assert_eq!(
            serde_json::to_value(frame).unwrap(),
            json!({"requestId": "r1", "intent": "teacher:end_poll", "success": true, "data": {"ok": true}})
        );
    }

    #[test]
    fn inbound_frame_tolerates_missing_payload() {
        let frame = InboundFrame::from_json_str(r#"{"intent": "session:snapshot"}"#).unwrap();
        assert!(frame.request_id.is_none());
        assert!(frame.payload.is_null());
    }
}
