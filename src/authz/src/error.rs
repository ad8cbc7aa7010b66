//! Error types for the rule store and cache

use thiserror::Error;

/// Authorization rule errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed input: missing required field or wrong shape
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Uniqueness violation on an entity code
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A referenced permission or role does not exist
    #[error("Reference error: {0}")]
    Reference(String),

    /// Storage unreachable while establishing the connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Storage call failed on an established connection
    #[error("Database error: {0}")]
    Database(String),

    /// Stored document does not match the record shape
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No identity could be resolved from the request
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Caller mistakes that must not be retried
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AuthzError::Validation(_) | AuthzError::Conflict(_) | AuthzError::Reference(_)
        )
    }

    /// Storage could not be reached; maps to a service-unavailable response
    pub fn is_unavailable(&self) -> bool {
        matches!(self, AuthzError::Connection(_))
    }
}

impl From<serde_json::Error> for AuthzError {
    fn from(err: serde_json::Error) -> Self {
        AuthzError::Serialization(err.to_string())
    }
}

/// Result type for rule store operations
pub type Result<T> = std::result::Result<T, AuthzError>;
