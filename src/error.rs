use thiserror::Error;

use crate::models::{DatabaseKind, Operation};

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors surfaced by database controllers.
///
/// Only the conditions below are translated; any other driver error is
/// passed through unchanged in one of the transparent variants.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The engine aborted the statement because of its time limit
    #[error("Statement timeout: {0}")]
    StatementTimeout(String),

    /// Connection lost or engine down; `connect_if_loss` recovers
    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("{operation} is not supported by the {backend} controller")]
    Unsupported {
        backend: DatabaseKind,
        operation: Operation,
    },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Framework invariant violated or misconfiguration
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid plan payload: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    MySql(#[from] mysql_async::Error),

    #[error(transparent)]
    DataFusion(#[from] datafusion::error::DataFusionError),
}

impl ControllerError {
    pub fn unsupported(backend: DatabaseKind, operation: Operation) -> Self {
        ControllerError::Unsupported { backend, operation }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, ControllerError::Unsupported { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ControllerError::StatementTimeout(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ControllerError::DatabaseUnavailable(_))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ControllerError::StatementTimeout(_) => "STATEMENT_TIMEOUT",
            ControllerError::DatabaseUnavailable(_) => "DATABASE_UNAVAILABLE",
            ControllerError::Unsupported { .. } => "UNSUPPORTED_OPERATION",
            ControllerError::AlreadyExists(_) => "ALREADY_EXISTS",
            ControllerError::Internal(_) => "INTERNAL_ERROR",
            ControllerError::InvalidInput(_) => "INVALID_INPUT",
            ControllerError::InvalidPlan(_) => "INVALID_PLAN",
            ControllerError::Postgres(_) | ControllerError::MySql(_) | ControllerError::DataFusion(_) => {
                "DATABASE_ERROR"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message() {
        let err = ControllerError::unsupported(DatabaseKind::MySql, Operation::SetHint);
        assert!(err.is_unsupported());
        assert_eq!(err.to_string(), "set_hint is not supported by the mysql controller");
        assert_eq!(err.code(), "UNSUPPORTED_OPERATION");
    }

    #[test]
    fn test_timeout_is_not_unavailable() {
        let err = ControllerError::StatementTimeout("canceling statement".to_string());
        assert!(err.is_timeout());
        assert!(!err.is_unavailable());
    }
}
