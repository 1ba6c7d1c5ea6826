//! Error types for the GitHub provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// GitHub provider errors
#[derive(Error, Debug)]
pub enum GitHubError {
    /// Token rejected or lacking permission (401/403)
    #[error("Authentication failed (status {status_code}): {message}")]
    AuthenticationFailed { status_code: u16, message: String },

    /// API request returned an error
    #[error("GitHub API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Path does not exist (or is not visible yet)
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Transport-level failure
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, GitHubError>;

/// Statuses worth retrying: 404 (write-then-read lag), 408, 429 and 5xx.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 404 | 408 | 429) || (500..600).contains(&status)
}

impl GitHubError {
    /// Builds the error for a non-2xx response.
    pub fn from_status(status_code: u16, path: &str, body: &[u8]) -> Self {
        let message = extract_message(body);
        match status_code {
            401 | 403 => GitHubError::AuthenticationFailed {
                status_code,
                message,
            },
            404 => GitHubError::NotFound {
                path: path.to_string(),
            },
            _ => GitHubError::ApiError {
                status_code,
                message,
            },
        }
    }

    /// HTTP status behind this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GitHubError::AuthenticationFailed { status_code, .. }
            | GitHubError::ApiError { status_code, .. } => Some(*status_code),
            GitHubError::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    /// Whether the same request may succeed if repeated later
    pub fn is_retryable(&self) -> bool {
        match self {
            GitHubError::NetworkError(_) => true,
            GitHubError::BridgeError(BridgeError::Network(_)) => true,
            _ => self.status_code().is_some_and(is_transient_status),
        }
    }
}

/// GitHub error bodies look like `{"message": "...", "documentation_url": "..."}`
fn extract_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

impl From<GitHubError> for BridgeError {
    fn from(error: GitHubError) -> Self {
        let retryable = error.is_retryable();
        match error {
            GitHubError::BridgeError(e) => e,
            GitHubError::NetworkError(msg) => BridgeError::Network(msg),
            other if retryable => BridgeError::Network(other.to_string()),
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}
