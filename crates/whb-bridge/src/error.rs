//! Error types for the bridge engine

use thiserror::Error;
use whb_client::DeviceError;
use whb_conv::ConvError;
use whb_core::StoreError;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur in the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Identifier, classification or resource error
    #[error(transparent)]
    Conv(#[from] ConvError),

    /// Device request failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Host store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Export document `type` is neither `flat` nor `struct`
    #[error("Unknown import type: {0}")]
    UnknownImportType(String),

    /// Export document without the model sentinel or with a broken shape
    #[error("Invalid export document: {0}")]
    InvalidDocument(String),

    /// A host state claims an OID that is already mapped elsewhere
    #[error("OID {oid} moved from {previous} to {current}")]
    MappingConflict {
        oid: String,
        previous: String,
        current: String,
    },

    /// A state write violates the recorded constraints
    #[error("state cannot be set: {0}")]
    Validation(String),

    /// No device session is active
    #[error("Not connected to the controller")]
    NotConnected,

    /// Host object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Device answered with an unexpected structure
    #[error("Malformed device response: {0}")]
    MalformedResponse(String),

    /// Settings could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// The adapter disabled itself after a fatal failure
    #[error("Adapter disabled: {0}")]
    Disabled(String),
}

impl BridgeError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::Conv(ConvError::UnknownFunction(_)) => 404,
            BridgeError::Conv(_) => 400,
            BridgeError::Device(DeviceError::AuthenticationFailed(_)) => 502,
            BridgeError::Device(DeviceError::Timeout) => 504,
            BridgeError::Device(DeviceError::Unreachable(_)) => 503,
            BridgeError::Device(_) => 502,
            BridgeError::Store(e) => e.status_code(),
            BridgeError::UnknownImportType(_) => 400,
            BridgeError::InvalidDocument(_) => 400,
            BridgeError::MappingConflict { .. } => 409,
            BridgeError::Validation(_) => 422,
            BridgeError::NotConnected => 503,
            BridgeError::NotFound(_) => 404,
            BridgeError::MalformedResponse(_) => 502,
            BridgeError::Config(_) => 500,
            BridgeError::Disabled(_) => 503,
        }
    }

    /// Whether the failure disables the adapter
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Device(DeviceError::AuthenticationFailed(_)) | BridgeError::Disabled(_)
        )
    }

    /// Whether a later connect attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Device(e) if e.is_retryable())
    }
}
