// Error handling module
// Defines the error type shared by the stores and the session lifecycle

use reqwest::StatusCode;
use thiserror::Error;

/// Maximum length for response bodies carried in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors that can occur while managing the auth session
#[derive(Error, Debug)]
pub enum AuthError {
    /// A required collaborator or option is missing
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-success HTTP response (anything but 401)
    #[error("HTTP error: {status} from {url} - {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// 401 response; the session has already been invalidated
    #[error("Unauthorized: {url}")]
    Unauthorized { url: String },

    /// Transport failure (connect, timeout, body read)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Storage medium failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite-backed storage failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// Build the error for a non-success HTTP response
    pub fn from_status(status: StatusCode, url: &str, body: &str) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            return AuthError::Unauthorized {
                url: url.to_string(),
            };
        }

        AuthError::Http {
            status: status.as_u16(),
            url: url.to_string(),
            body: truncate_body(body),
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Http { status, .. } => Some(*status),
            AuthError::Unauthorized { .. } => Some(401),
            AuthError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this error is a 401
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AuthError::Unauthorized { .. })
    }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }

    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, AuthError>;
