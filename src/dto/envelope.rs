use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::ServiceError;

/// Machine-readable failure detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable error code such as `POLL_ALREADY_ACTIVE`.
    pub code: String,
    /// Human readable explanation.
    pub message: String,
}

/// Uniform reply shape: `{success, data}` or `{success, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Envelope {
    /// Whether the intent succeeded.
    pub success: bool,
    /// Intent result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<Value>,
    /// Failure detail otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    /// Successful reply carrying `data`.
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed reply.
    pub fn failure(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

impl From<Result<Value, ServiceError>> for Envelope {
    fn from(value: Result<Value, ServiceError>) -> Self {
        match value {
            Ok(data) => Envelope::success(data),
            Err(err) => Envelope::failure(err.to_body()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn failure_omits_data() {
        let envelope = Envelope::from(Err(ServiceError::NoActivePoll));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "error": {"code": "NO_ACTIVE_POLL", "message": "no active poll"}
            })
        );
    }

    #[test]
    fn success_omits_error() {
        let value = serde_json::to_value(Envelope::success(json!({"ok": 1}))).unwrap();
        assert_eq!(value, json!({"success": true, "data": {"ok": 1}}));
    }
}
