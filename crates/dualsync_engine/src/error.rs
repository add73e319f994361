//! Error types for the replication engine.

use dualsync_core::{ConfigError, CoreError};
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while replicating.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A statement failed in one of the stores.
    #[error("store error: {message}")]
    Store {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A store cannot be reached. Aborts the whole run.
    #[error("cannot reach store: {0}")]
    Connection(String),

    /// A statement exceeded its timeout.
    #[error("statement timed out: {0}")]
    Timeout(String),

    /// A write violated a constraint of the target table.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Invalid sync configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Value parsing or row coercion failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No descriptor is registered under this name.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// A configured table does not exist in a store.
    #[error("table '{table}' does not exist in the {store} store")]
    MissingTable {
        /// Table name.
        table: String,
        /// Store name.
        store: String,
    },

    /// A table that must be upserted has no primary key.
    #[error("table '{0}' has no primary key")]
    MissingPrimaryKey(String),

    /// `initialize()` has not been called, or `cleanup()` already was.
    #[error("engine is not initialized")]
    NotInitialized,

    /// A run was requested while another one is active.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable store error.
    pub fn store_retryable(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable store error.
    pub fn store_fatal(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later attempt may succeed.
    ///
    /// The engine never retries; this is for the scheduler driving it.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store { retryable, .. } => *retryable,
            SyncError::Connection(_) | SyncError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Connection(_) | SyncError::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::store_retryable("serialization failure").is_retryable());
        assert!(!SyncError::store_fatal("syntax error").is_retryable());
        assert!(SyncError::Timeout("fetch orders".into()).is_retryable());
        assert!(SyncError::Connection("refused".into()).is_retryable());
        assert!(!SyncError::Constraint("duplicate key".into()).is_retryable());
    }

    #[test]
    fn fatal_errors() {
        assert!(SyncError::Connection("refused".into()).is_fatal());
        assert!(!SyncError::Timeout("x".into()).is_fatal());
        assert!(!SyncError::MissingPrimaryKey("orders".into()).is_fatal());
    }

    #[test]
    fn error_display() {
        let err = SyncError::MissingTable {
            table: "orders".into(),
            store: "cloud".into(),
        };
        assert_eq!(err.to_string(), "table 'orders' does not exist in the cloud store");
    }
}
