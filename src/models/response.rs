use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlResponse {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message_id: None,
            message: None,
        }
    }

    pub fn published(message_id: Uuid) -> Self {
        Self {
            status: "success".to_string(),
            message_id: Some(message_id),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message_id: None,
            message: Some(message.into()),
        }
    }
}
