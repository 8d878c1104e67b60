//! Uniform `{success, message, data?}` answers for every action endpoint.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::auth::validation::FieldErrors;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse<T = Value> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ActionResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Failures of an action. Every message is safe to show to users.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("{message}")]
    Validation { message: String, errors: FieldErrors },

    #[error("{0}")]
    Rejected(String),

    #[error("{message}")]
    Cooldown { message: String, minutes: u32 },

    /// The secret exists server-side but the email did not go out.
    #[error("{message}")]
    Delivery { message: String, data: Value },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Technical(String),
}

impl From<FieldErrors> for ActionError {
    fn from(errors: FieldErrors) -> Self {
        ActionError::Validation {
            message: errors.first_message().to_string(),
            errors,
        }
    }
}

impl From<JsonRejection> for ActionError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(reason = %rejection.body_text(), "unreadable request body");
        ActionError::Rejected("Invalid request body".into())
    }
}

impl ActionError {
    pub fn status(&self) -> StatusCode {
        match self {
            ActionError::Validation { .. } | ActionError::Rejected(_) => StatusCode::BAD_REQUEST,
            ActionError::Cooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            ActionError::Delivery { .. } => StatusCode::BAD_GATEWAY,
            ActionError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ActionError::NotFound(_) => StatusCode::NOT_FOUND,
            ActionError::Technical(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_body(self) -> ActionResponse<Value> {
        let message = self.to_string();
        let data = match self {
            ActionError::Validation { errors, .. } => Some(json!({ "validationErrors": errors })),
            ActionError::Cooldown { minutes, .. } => Some(json!({ "minutesRemaining": minutes })),
            ActionError::Delivery { data, .. } => Some(data),
            _ => None,
        };
        ActionResponse {
            success: false,
            message,
            data,
        }
    }
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.into_body())).into_response()
    }
}

pub type ActionResult<T> = Result<Json<ActionResponse<T>>, ActionError>;
