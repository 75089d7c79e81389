use serde::{Deserialize, Serialize};

use crate::orchestrator::{ActionError, FetchError};

/// Response envelope spoken at the transport boundary:
/// `{status, messages, code, data}`. Internal Result/Error types map onto
/// this shape here and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: bool,
    pub messages: Vec<String>,
    pub code: i32,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: true,
            messages: Vec::new(),
            code: 200,
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            status: false,
            messages: vec![message.into()],
            code,
            data: None,
        }
    }
}

impl<T> From<ActionError> for ApiResponse<T> {
    fn from(err: ActionError) -> Self {
        let code = match &err {
            ActionError::DeviceNotFound(_) => 404,
            ActionError::Conflict(_) | ActionError::InvalidTransition { .. } => 409,
            ActionError::ApplyFailed(_) => 502,
        };
        ApiResponse::error(code, err.to_string())
    }
}

impl<T> From<FetchError> for ApiResponse<T> {
    fn from(err: FetchError) -> Self {
        ApiResponse::error(502, err.to_string())
    }
}
