use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    dto::envelope::{Envelope, ErrorBody},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Question, options or duration violate the poll constraints.
    #[error("invalid poll: {0}")]
    InvalidPollSpec(String),
    /// Another poll is still accepting votes.
    #[error("a poll is already active")]
    PollAlreadyActive,
    /// No poll is active, or the referenced poll is not the active one.
    #[error("no active poll")]
    NoActivePoll,
    /// The selected option is not part of the poll.
    #[error("invalid option `{0}`")]
    InvalidOption(String),
    /// The voter already voted in this poll.
    #[error("`{0}` has already voted in this poll")]
    DuplicateVote(String),
    /// The requester lacks the authority for the intent.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Another connected student holds the name.
    #[error("name `{0}` is already taken")]
    NameTaken(String),
    /// The name is empty, too long or contains forbidden characters.
    #[error("invalid name: {0}")]
    InvalidNameFormat(String),
    /// No connected student matches the name.
    #[error("student `{0}` not found")]
    StudentNotFound(String),
    /// The poll was already closed.
    #[error("poll has already ended")]
    PollAlreadyEnded,
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without a record store.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Malformed input that does not fit a more specific kind.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Unexpected internal fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidPollSpec(_) => "INVALID_POLL_SPEC",
            ServiceError::PollAlreadyActive => "POLL_ALREADY_ACTIVE",
            ServiceError::NoActivePoll => "NO_ACTIVE_POLL",
            ServiceError::InvalidOption(_) => "INVALID_OPTION",
            ServiceError::DuplicateVote(_) => "DUPLICATE_VOTE",
            ServiceError::Unauthorized(_) => "UNAUTHORIZED",
            ServiceError::NameTaken(_) => "NAME_TAKEN",
            ServiceError::InvalidNameFormat(_) => "INVALID_NAME_FORMAT",
            ServiceError::StudentNotFound(_) => "STUDENT_NOT_FOUND",
            ServiceError::PollAlreadyEnded => "POLL_ALREADY_ENDED",
            ServiceError::Unavailable(_) | ServiceError::Degraded => "STORE_UNAVAILABLE",
            ServiceError::InvalidInput(_) => "INVALID_INPUT",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to clients. Internal faults are logged and replaced.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Unavailable(source) => {
                error!(error = %source, "storage failure surfaced to client");
                "Storage is temporarily unavailable, please retry".into()
            }
            ServiceError::Internal(detail) => {
                error!(detail = %detail, "internal error surfaced to client");
                "Internal server error".into()
            }
            other => other.to_string(),
        }
    }

    /// Wire representation of this error.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.public_message(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(ErrorBody {
            code: "INVALID_INPUT".into(),
            message: format!("validation failed: {err}"),
        })
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {}", .0.message)]
    BadRequest(ErrorBody),
    /// Unauthorized access attempt.
    #[error("unauthorized: {}", .0.message)]
    Unauthorized(ErrorBody),
    /// Requested resource not found.
    #[error("not found: {}", .0.message)]
    NotFound(ErrorBody),
    /// Conflict with current state.
    #[error("conflict: {}", .0.message)]
    Conflict(ErrorBody),
    /// Service unavailable or degraded.
    #[error("service unavailable: {}", .0.message)]
    ServiceUnavailable(ErrorBody),
    /// Internal server error.
    #[error("internal error: {}", .0.message)]
    Internal(ErrorBody),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let body = err.to_body();
        match err {
            ServiceError::InvalidPollSpec(_)
            | ServiceError::InvalidOption(_)
            | ServiceError::InvalidNameFormat(_)
            | ServiceError::InvalidInput(_) => AppError::BadRequest(body),
            ServiceError::Unauthorized(_) => AppError::Unauthorized(body),
            ServiceError::NoActivePoll
            | ServiceError::StudentNotFound(_)
            | ServiceError::NotFound(_) => AppError::NotFound(body),
            ServiceError::PollAlreadyActive
            | ServiceError::DuplicateVote(_)
            | ServiceError::NameTaken(_)
            | ServiceError::PollAlreadyEnded => AppError::Conflict(body),
            ServiceError::Unavailable(_) | ServiceError::Degraded => {
                AppError::ServiceUnavailable(body)
            }
            ServiceError::Internal(_) => AppError::Internal(body),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            AppError::BadRequest(body) => (StatusCode::BAD_REQUEST, body),
            AppError::Unauthorized(body) => (StatusCode::UNAUTHORIZED, body),
            AppError::NotFound(body) => (StatusCode::NOT_FOUND, body),
            AppError::Conflict(body) => (StatusCode::CONFLICT, body),
            AppError::ServiceUnavailable(body) => (StatusCode::SERVICE_UNAVAILABLE, body),
            AppError::Internal(body) => (StatusCode::INTERNAL_SERVER_ERROR, body),
        };

        (status, Json(Envelope::failure(body))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_share_one_code() {
        let unavailable = ServiceError::from(StorageError::Offline("test".into()));
        assert_eq!(unavailable.code(), "STORE_UNAVAILABLE");
        assert_eq!(ServiceError::Degraded.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let body = ServiceError::Internal("mutex poisoned at line 12".into()).to_body();
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert!(!body.message.contains("mutex"));
    }

    #[test]
    fn conflicts_map_to_409() {
        let response = AppError::from(ServiceError::PollAlreadyActive).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = AppError::from(ServiceError::NoActivePoll).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
