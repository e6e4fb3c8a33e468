//! Parameter Store Error Types

use thiserror::Error;

use crate::catalog::ParameterId;
use crate::value::ValueType;

/// Result type for parameter store operations
pub type Result<T> = std::result::Result<T, EconfError>;

/// Parameter store errors
#[derive(Debug, Error)]
pub enum EconfError {
    /// Storage could not be opened, read or written
    #[error("I/O error: {0}")]
    Io(String),

    /// A stored value could not be decoded or has the wrong type
    #[error("Corrupt data for {key}: {reason}")]
    CorruptData { key: String, reason: String },

    /// Unknown parameter name or index
    #[error("Parameter not found: {0}")]
    NotFound(String),

    /// Access mode forbids the operation
    #[error("Access denied: {id} is {access}")]
    AccessDenied { id: ParameterId, access: &'static str },

    /// Value type differs from the descriptor's type
    #[error("Type mismatch for {id}: expected {expected}, got {actual}")]
    TypeMismatch {
        id: ParameterId,
        expected: ValueType,
        actual: ValueType,
    },

    /// Value violates the parameter's validation rule
    #[error("Invalid value for {id}: {reason}")]
    InvalidValue { id: ParameterId, reason: String },

    /// Input text could not be parsed as the requested type
    #[error("Cannot parse '{input}' as {expected}")]
    Parse { input: String, expected: ValueType },

    /// Poll scheduler already running
    #[error("Poll scheduler already running")]
    AlreadyRunning,

    /// Poll interval must be positive
    #[error("Invalid poll interval: {0}ms")]
    InvalidInterval(u64),

    /// Polling requested without a data source attached
    #[error("No data source attached")]
    NoDataSource,

    /// Callback reported a failure
    #[error("Callback error for {id}: {reason}")]
    Callback { id: ParameterId, reason: String },

    /// Configuration loading error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EconfError {
    /// Whether the error came from the storage layer
    pub fn is_io(&self) -> bool {
        matches!(self, EconfError::Io(_))
    }
}

impl From<sqlx::Error> for EconfError {
    fn from(err: sqlx::Error) -> Self {
        EconfError::Io(err.to_string())
    }
}

impl From<std::io::Error> for EconfError {
    fn from(err: std::io::Error) -> Self {
        EconfError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EconfError {
    fn from(err: serde_json::Error) -> Self {
        EconfError::Io(format!("JSON: {}", err))
    }
}

impl From<figment::Error> for EconfError {
    fn from(err: figment::Error) -> Self {
        EconfError::Config(err.to_string())
    }
}
