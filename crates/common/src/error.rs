use thiserror::Error;

use crate::types::{Hash, NodeId};

/// Common error types for the thicket block forest
#[derive(Error, Debug)]
pub enum ForestError {
    /// A referenced node vanished between selection and processing.
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    /// No stored node carries this hash.
    #[error("No node with hash {0}")]
    HashNotFound(Hash),

    /// The nested-interval encoding is broken; never recovered locally.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The debounce timer finished with something other than elapsed/canceled.
    #[error("Timer error: {0}")]
    Timer(String),

    /// Database related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Difficulty bits could not be turned into work
    #[error("Difficulty error: {0}")]
    Difficulty(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Database specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database corruption detected: {0}")]
    Corruption(String),

    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ForestError>;

/// Error conversion traits
impl From<sled::Error> for ForestError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Corruption { .. } => {
                ForestError::Database(DatabaseError::Corruption(err.to_string()))
            }
            other => ForestError::Database(DatabaseError::TransactionFailed(other.to_string())),
        }
    }
}

impl From<bincode::Error> for ForestError {
    fn from(err: bincode::Error) -> Self {
        ForestError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ForestError {
    fn from(err: serde_json::Error) -> Self {
        ForestError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ForestError {
    fn from(err: toml::de::Error) -> Self {
        ForestError::Config(format!("TOML parsing error: {}", err))
    }
}

impl From<config::ConfigError> for ForestError {
    fn from(err: config::ConfigError) -> Self {
        ForestError::Config(format!("Configuration error: {}", err))
    }
}

/// Error context helper
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<ForestError>,
{
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            // Keep the taxonomy intact for the variants callers branch on.
            err @ (ForestError::NotFound(_)
            | ForestError::HashNotFound(_)
            | ForestError::InvariantViolation(_)
            | ForestError::Timer(_)
            | ForestError::Database(DatabaseError::Corruption(_))) => err,
            ForestError::Internal(msg) => ForestError::Internal(format!("{}: {}", context, msg)),
            ForestError::Database(db_err) => ForestError::Database(DatabaseError::TransactionFailed(
                format!("{}: {}", context, db_err),
            )),
            other => ForestError::Internal(format!("{}: {}", context, other)),
        })
    }
}
