//! Repository for the append-only `pose_alignments` table.

use posecraft_core::alignment::PoseAlignment;
use posecraft_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::alignment::StoredAlignment;

const COLUMNS: &str = "id, project_id, alignment, validation_score, created_at";

pub struct AlignmentRepo;

impl AlignmentRepo {
    pub async fn insert(
        pool: &PgPool,
        project_id: DbId,
        alignment: &PoseAlignment,
    ) -> Result<StoredAlignment, sqlx::Error> {
        let query = format!(
            "INSERT INTO pose_alignments (project_id, alignment, validation_score) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, StoredAlignment>(&query)
            .bind(project_id)
            .bind(Json(alignment))
            .bind(alignment.validation_score)
            .fetch_one(pool)
            .await
    }

    /// The newest alignment for a project.
    pub async fn find_latest(pool: &PgPool, project_id: DbId) -> Result<Option<StoredAlignment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM pose_alignments WHERE project_id = $1 ORDER BY id DESC LIMIT 1"
        );
        sqlx::query_as::<_, StoredAlignment>(&query)
            .bind(project_id)
            .fetch_optional(pool)
            .await
    }
}
