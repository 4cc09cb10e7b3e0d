//! Error types for identifier parsing and datapoint classification

use thiserror::Error;

/// Errors that can occur while decoding controller data
#[derive(Debug, Error)]
pub enum ConvError {
    /// OID string does not have the `/subnet/node/fct/group/member[/ext]` shape
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),

    /// Group or member number is not a non-negative integer
    #[error("invalid number: {0}")]
    InvalidNumber(String),

    /// Function type has no entry in the function-type configuration
    #[error("unknown function type: {0}")]
    UnknownFunctionType(i64),

    /// Datapoint belongs to a function that is not part of the live function table
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Resource document could not be flattened
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// XML parsing error
    #[error("XML parse error: {0}")]
    XmlError(#[from] quick_xml::Error),

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for conversion operations
pub type ConvResult<T> = Result<T, ConvError>;
