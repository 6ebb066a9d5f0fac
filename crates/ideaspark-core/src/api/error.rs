use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The session could not be refreshed and has been torn down.
    /// The user must sign in again.
    #[error("Session expired. Please login again.")]
    SessionExpired,

    /// Credentials were rejected and the request was not replayed after refresh.
    #[error("Unauthorized - request was not retried")]
    Unauthorized,

    #[error("{message}")]
    Http {
        status: StatusCode,
        message: String,
        body: Option<Value>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Object fields that may carry a human-readable error message, in priority order.
const MESSAGE_FIELDS: [&str; 3] = ["message", "error", "msg"];

impl ApiError {
    /// Truncate a response body to avoid carrying excessive data around
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build an error for a non-success response from its parsed body.
    pub fn from_status(status: StatusCode, body: &Value) -> Self {
        let message = Self::extract_message(body)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

        let body = match body {
            Value::Null => None,
            Value::String(text) => Some(Value::String(Self::truncate_body(text))),
            other => Some(other.clone()),
        };

        ApiError::Http {
            status,
            message,
            body,
        }
    }

    fn extract_message(body: &Value) -> Option<String> {
        let object = body.as_object()?;
        MESSAGE_FIELDS
            .iter()
            .filter_map(|field| object.get(*field))
            .filter_map(Value::as_str)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::SessionExpired | ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired)
    }

    /// Whether the UI must involve the user: sign in again, or fix the input.
    pub fn requires_user_action(&self) -> bool {
        match self {
            ApiError::SessionExpired | ApiError::Unauthorized => true,
            ApiError::Http { status, .. } => status.is_client_error(),
            _ => false,
        }
    }
}
