use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{
    ChatMessageEntity, PollEntity, PollStatus, SenderType, SessionEntity,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPollDocument {
    #[serde(rename = "_id")]
    id: String,
    question: String,
    options: Vec<String>,
    duration_secs: i64,
    status: PollStatus,
    results: Vec<MongoOptionCount>,
    total_votes: i64,
    total_students: i64,
    session_id: String,
    teacher_connection_id: String,
    created_at: DateTime,
    started_at: DateTime,
    ended_at: Option<DateTime>,
    #[serde(default)]
    end_reason: Option<String>,
}

/// Option labels are free text, so counts are stored as pairs rather than as field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoOptionCount {
    option: String,
    votes: i64,
}

impl From<PollEntity> for MongoPollDocument {
    fn from(value: PollEntity) -> Self {
        Self {
            id: value.id.to_string(),
            question: value.question,
            options: value.options,
            duration_secs: i64::from(value.duration_secs),
            status: value.status,
            results: value
                .results
                .into_iter()
                .map(|(option, votes)| MongoOptionCount {
                    option,
                    votes: clamp_count(votes),
                })
                .collect(),
            total_votes: clamp_count(value.total_votes),
            total_students: clamp_count(value.total_students),
            session_id: value.session_id,
            teacher_connection_id: value.teacher_connection_id.to_string(),
            created_at: DateTime::from_system_time(value.created_at),
            started_at: DateTime::from_system_time(value.started_at),
            ended_at: value.ended_at.map(DateTime::from_system_time),
            end_reason: value.end_reason,
        }
    }
}

impl TryFrom<MongoPollDocument> for PollEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPollDocument) -> Result<Self, Self::Error> {
        let id = parse_uuid(&value.id, &value.id)?;
        let teacher_connection_id = parse_uuid(&value.id, &value.teacher_connection_id)?;
        let duration_secs =
            u32::try_from(value.duration_secs).map_err(|_| MongoDaoError::MalformedDocument {
                id: value.id.clone(),
                reason: format!("duration {} out of range", value.duration_secs),
            })?;

        Ok(Self {
            id,
            question: value.question,
            options: value.options,
            duration_secs,
            status: value.status,
            results: value
                .results
                .into_iter()
                .map(|count| (count.option, unsigned(count.votes)))
                .collect(),
            total_votes: unsigned(value.total_votes),
            total_students: unsigned(value.total_students),
            session_id: value.session_id,
            teacher_connection_id,
            created_at: value.created_at.to_system_time(),
            started_at: value.started_at.to_system_time(),
            ended_at: value.ended_at.map(|at| at.to_system_time()),
            end_reason: value.end_reason,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    session_id: String,
    teacher_connection_id: String,
    teacher_joined_at: DateTime,
    last_activity_at: DateTime,
    current_students: i64,
    peak_students: i64,
    polls_created: i64,
    messages_count: i64,
    is_active: bool,
    created_at: DateTime,
    ended_at: Option<DateTime>,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            session_id: value.session_id,
            teacher_connection_id: value.teacher_connection_id.to_string(),
            teacher_joined_at: DateTime::from_system_time(value.teacher_joined_at),
            last_activity_at: DateTime::from_system_time(value.last_activity_at),
            current_students: clamp_count(value.current_students),
            peak_students: clamp_count(value.peak_students),
            polls_created: clamp_count(value.polls_created),
            messages_count: clamp_count(value.messages_count),
            is_active: value.is_active,
            created_at: DateTime::from_system_time(value.created_at),
            ended_at: value.ended_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let teacher_connection_id =
            parse_uuid(&value.session_id, &value.teacher_connection_id)?;
        Ok(Self {
            session_id: value.session_id,
            teacher_connection_id,
            teacher_joined_at: value.teacher_joined_at.to_system_time(),
            last_activity_at: value.last_activity_at.to_system_time(),
            current_students: unsigned(value.current_students),
            peak_students: unsigned(value.peak_students),
            polls_created: unsigned(value.polls_created),
            messages_count: unsigned(value.messages_count),
            is_active: value.is_active,
            created_at: value.created_at.to_system_time(),
            ended_at: value.ended_at.map(|at| at.to_system_time()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoChatMessageDocument {
    #[serde(rename = "_id")]
    id: String,
    message: String,
    sender: String,
    sender_type: SenderType,
    session_id: String,
    connection_id: String,
    is_deleted: bool,
    created_at: DateTime,
}

impl From<ChatMessageEntity> for MongoChatMessageDocument {
    fn from(value: ChatMessageEntity) -> Self {
        Self {
            id: value.id.to_string(),
            message: value.message,
            sender: value.sender,
            sender_type: value.sender_type,
            session_id: value.session_id,
            connection_id: value.connection_id.to_string(),
            is_deleted: value.is_deleted,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoChatMessageDocument> for ChatMessageEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoChatMessageDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&value.id, &value.id)?,
            connection_id: parse_uuid(&value.id, &value.connection_id)?,
            message: value.message,
            sender: value.sender,
            sender_type: value.sender_type,
            session_id: value.session_id,
            is_deleted: value.is_deleted,
            created_at: value.created_at.to_system_time(),
        })
    }
}

pub fn doc_id(id: impl Into<String>) -> Document {
    doc! {"_id": id.into()}
}

fn parse_uuid(document_id: &str, raw: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(raw).map_err(|err| MongoDaoError::MalformedDocument {
        id: document_id.to_owned(),
        reason: err.to_string(),
    })
}

fn clamp_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn unsigned(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
