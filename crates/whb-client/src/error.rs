//! Error types for device operations

use thiserror::Error;

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while talking to the controller
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Credentials were rejected; retrying is pointless
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Non-success response or malformed body
    #[error("Device request failed ({}): {body}", status_label(.status))]
    RequestFailed { status: Option<u16>, body: String },

    /// Device could not be reached
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Digest challenge could not be answered
    #[error("Digest authentication error: {0}")]
    Digest(String),

    /// Operation not supported by this gateway
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl DeviceError {
    /// Create a request error from status code and body
    pub fn request_failed(status: Option<u16>, body: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            body: body.into(),
        }
    }

    /// Whether a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeviceError::Unreachable(_) | DeviceError::Timeout)
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            DeviceError::RequestFailed { status, .. } => *status,
            DeviceError::AuthenticationFailed(_) => Some(401),
            _ => None,
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no status".to_string())
}

impl From<reqwest::Error> for DeviceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeviceError::Timeout
        } else if err.is_connect() {
            DeviceError::Unreachable(err.to_string())
        } else {
            DeviceError::request_failed(err.status().map(|s| s.as_u16()), err.to_string())
        }
    }
}
