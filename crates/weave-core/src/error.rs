//! Error types for weave core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeaveError {
    /// The request references something the catalogue does not know, or is malformed.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Query execution error in statement {query}: {message}\n  sql: {sql}")]
    QueryExecutionError {
        query: usize,
        sql: String,
        message: String,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WeaveError {
    pub fn config(message: impl Into<String>) -> Self {
        WeaveError::ConfigurationError(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        WeaveError::InternalError(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, WeaveError::ConfigurationError(_))
    }
}

pub type Result<T> = std::result::Result<T, WeaveError>;

impl From<anyhow::Error> for WeaveError {
    fn from(err: anyhow::Error) -> Self {
        WeaveError::InternalError(format!("{err:#}"))
    }
}
