//! Persisted pose alignments.

use posecraft_core::alignment::PoseAlignment;
use posecraft_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `pose_alignments` table. Rows are never updated; a newer
/// row for the same project supersedes older ones.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct StoredAlignment {
    pub id: DbId,
    pub project_id: DbId,
    pub alignment: Json<PoseAlignment>,
    pub validation_score: f64,
    pub created_at: Timestamp,
}
