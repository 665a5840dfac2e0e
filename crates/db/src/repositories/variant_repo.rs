//! Repository for the `variants` table.
//!
//! Status changes are guarded in SQL (`WHERE status_id = ...`) so a
//! transition only applies when the row is still in the expected state.

use posecraft_core::status::{StatusId, VariantStatus};
use posecraft_core::types::DbId;
use sqlx::PgPool;

use crate::models::variant::{CompleteVariant, CreateVariant, Variant};

/// Column list for `variants` queries.
const COLUMNS: &str = "\
    id, project_id, variant_number, seed, status_id, image_url, \
    generation_time_secs, backend_request_id, \
    ssim, pose_accuracy, color_delta, style_consistency, \
    correction_method, correction_score, error_message, \
    created_at, updated_at";

/// Statuses a variant may fail from.
const FAILABLE_STATUSES: [StatusId; 2] = [
    VariantStatus::Pending as StatusId,
    VariantStatus::Generating as StatusId,
];

pub struct VariantRepo;

impl VariantRepo {
    /// Insert all variants of a project in one transaction.
    pub async fn create_many(
        pool: &PgPool,
        project_id: DbId,
        inputs: &[CreateVariant],
    ) -> Result<Vec<Variant>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let created = Self::insert_many_inner(&mut tx, project_id, inputs).await?;
        tx.commit().await?;
        Ok(created)
    }

    pub(crate) async fn insert_many_inner(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        project_id: DbId,
        inputs: &[CreateVariant],
    ) -> Result<Vec<Variant>, sqlx::Error> {
        let query = format!(
            "INSERT INTO variants (project_id, variant_number, seed, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            let variant = sqlx::query_as::<_, Variant>(&query)
                .bind(project_id)
                .bind(input.variant_number)
                .bind(input.seed)
                .bind(VariantStatus::Pending.id())
                .fetch_one(&mut **tx)
                .await?;
            created.push(variant);
        }
        created.sort_by_key(|v| v.variant_number);
        Ok(created)
    }

    pub async fn list_by_project(pool: &PgPool, project_id: DbId) -> Result<Vec<Variant>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM variants WHERE project_id = $1 ORDER BY variant_number ASC"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Variant>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM variants WHERE id = $1");
        sqlx::query_as::<_, Variant>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Compare-and-set `pending -> generating`. Returns `true` if the row moved.
    pub async fn start(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE variants SET status_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(VariantStatus::Generating.id())
        .bind(VariantStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `generating -> completed`. Returns `None` when the row is missing or
    /// not `generating`.
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        input: &CompleteVariant,
    ) -> Result<Option<Variant>, sqlx::Error> {
        let query = format!(
            "UPDATE variants SET \
                status_id = $2, image_url = $3, generation_time_secs = $4, \
                backend_request_id = $5, ssim = $6, pose_accuracy = $7, \
                color_delta = $8, style_consistency = $9, \
                correction_method = $10, correction_score = $11, \
                error_message = NULL, updated_at = NOW() \
             WHERE id = $1 AND status_id = $12 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(id)
            .bind(VariantStatus::Completed.id())
            .bind(&input.image_url)
            .bind(input.generation_time_secs)
            .bind(&input.backend_request_id)
            .bind(input.scores.ssim)
            .bind(input.scores.pose_accuracy)
            .bind(input.scores.color_delta)
            .bind(input.scores.style_consistency)
            .bind(&input.correction_method)
            .bind(input.correction_score)
            .bind(VariantStatus::Generating.id())
            .fetch_optional(pool)
            .await
    }

    /// `pending | generating -> failed`, clearing correction fields.
    /// Returns `None` when the row is missing or already terminal.
    pub async fn fail(
        pool: &PgPool,
        id: DbId,
        error_message: &str,
    ) -> Result<Option<Variant>, sqlx::Error> {
        let query = format!(
            "UPDATE variants SET \
                status_id = $2, error_message = $3, \
                correction_method = NULL, correction_score = NULL, \
                updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(id)
            .bind(VariantStatus::Failed.id())
            .bind(error_message)
            .bind(&FAILABLE_STATUSES[..])
            .fetch_optional(pool)
            .await
    }
}
