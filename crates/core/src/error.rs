use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures that make a pose alignment impossible.
///
/// Fatal to the alignment request and surfaced to the caller; never
/// produces a partial alignment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("No insertion zone found in background scene")]
    NoInsertionZone,

    #[error("Required reference image is missing: {0}")]
    MissingReference(&'static str),
}
