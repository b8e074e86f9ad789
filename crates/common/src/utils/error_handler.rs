use crate::error::{DatabaseError, ForestError, Result};
use tracing::{debug, error, warn};

/// Classifies forest errors and logs them at the level their class deserves.
pub struct ErrorHandler;

impl ErrorHandler {
    /// Log a failure and turn it into `None`; for callers that abandon a cycle.
    pub fn handle_error<T>(result: Result<T>, operation: &str) -> Option<T> {
        match result {
            Ok(value) => {
                debug!("Operation '{}' completed successfully", operation);
                Some(value)
            }
            Err(err) => {
                Self::log_error(&err, operation);
                None
            }
        }
    }

    /// Log a failure and hand it back to the caller.
    pub fn handle_error_propagate<T>(result: Result<T>, operation: &str) -> Result<T> {
        if let Err(err) = &result {
            Self::log_error(err, operation);
        }
        result
    }

    /// Log errors with appropriate level based on error type
    pub fn log_error(error: &ForestError, operation: &str) {
        match error {
            ForestError::NotFound(_) | ForestError::HashNotFound(_) => {
                warn!("'{}' abandoned, will retry on next trigger: {}", operation, error);
            }
            ForestError::Timer(_) => {
                error!("'{}' skipped this cycle: {}", operation, error);
            }
            ForestError::InvariantViolation(_) => {
                error!("Forest corrupted during '{}': {}", operation, error);
            }
            ForestError::Difficulty(_) => {
                warn!("Difficulty error in '{}': {}", operation, error);
            }
            ForestError::Database(db_err) => {
                error!("Database error in '{}': {}", operation, db_err);
            }
            other => {
                error!("Error in '{}': {}", operation, other);
            }
        }
    }

    /// Conditions that leave the forest consistent; the next trigger retries.
    pub fn is_recoverable(error: &ForestError) -> bool {
        match error {
            ForestError::NotFound(_) | ForestError::HashNotFound(_) => true,
            ForestError::Timer(_) => true,
            ForestError::Difficulty(_) => true,
            ForestError::Database(DatabaseError::ConnectionFailed(_)) => true,
            ForestError::Database(DatabaseError::TransactionFailed(_)) => true,
            ForestError::Io(_) => true,
            _ => false,
        }
    }

    /// Conditions that must surface to the operator untouched.
    pub fn is_fatal(error: &ForestError) -> bool {
        matches!(
            error,
            ForestError::InvariantViolation(_) | ForestError::Database(DatabaseError::Corruption(_))
        )
    }
}
