use posecraft_core::error::CoreError;
use posecraft_core::types::DbId;

/// Storage failures. Any of these is fatal to a project run.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// A status transition the state machine does not allow.
    #[error("Invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: DbId,
        from: &'static str,
        to: &'static str,
    },

    /// A uniqueness rule would be violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value no longer decodes into its domain type.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => StoreError::NotFound { entity, id },
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}
