use thiserror::Error;
use uuid::Uuid;

/// Errors from repository operations (used by trait definitions in conductor-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// The database was locked or busy. Safe to retry the whole operation.
    #[error("database busy: {0}")]
    Busy(String),

    /// A fresh running execution already exists for this work item.
    #[error("work item '{work_item_id}' already has a running execution ({execution_id})")]
    AlreadyRunning {
        work_item_id: String,
        execution_id: Uuid,
    },
}

impl RepositoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Busy(_))
    }
}
