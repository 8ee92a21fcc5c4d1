//! Drive API Error Types
//!
//! Maps HTTP status codes to specific variants so the token manager can spot
//! credential rejections and the orchestrator can classify failures.

use crate::cache::StorageError;

/// Credential failures that cannot be fixed without the user
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Reauthorization required")]
    ReauthRequired,

    #[error("Credential rejected after refresh")]
    Rejected,

    #[error("Silent refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Interactive login failed: {0}")]
    Interactive(String),
}

/// Drive API error types
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Credential rejected by server ({0})")]
    Unauthorized(u16),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Unsupported in {0}")]
    NotSupported(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request error: {0}")]
    Request(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DriveError {
    /// Whether the server refused the current access token
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, DriveError::Unauthorized(_))
    }

    /// Create a DriveError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => DriveError::Unauthorized(status),
            404 => DriveError::NotFound(body.to_string()),
            408 => DriveError::Timeout,
            429 => DriveError::RateLimited,
            500..=599 => DriveError::Server(status, body.to_string()),
            _ => DriveError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DriveError::Timeout
        } else if err.is_decode() {
            DriveError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            DriveError::from_status(status.as_u16(), &err.to_string())
        } else {
            DriveError::Network(err.to_string())
        }
    }
}

pub type DriveResult<T> = Result<T, DriveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(DriveError::from_status(401, "").is_auth_rejection());
        assert!(DriveError::from_status(403, "").is_auth_rejection());
        assert!(matches!(
            DriveError::from_status(404, "gone"),
            DriveError::NotFound(ref body) if body == "gone"
        ));
        assert!(matches!(DriveError::from_status(408, ""), DriveError::Timeout));
        assert!(matches!(DriveError::from_status(429, ""), DriveError::RateLimited));
        assert!(matches!(
            DriveError::from_status(503, "busy"),
            DriveError::Server(503, _)
        ));
        assert!(matches!(
            DriveError::from_status(400, "bad"),
            DriveError::Request(_)
        ));
    }

    #[test]
    fn test_auth_error_is_not_a_rejection() {
        // Only raw server rejections trigger the refresh-retry path
        let err = DriveError::from(AuthError::ReauthRequired);
        assert!(!err.is_auth_rejection());
    }
}
