//! Repository for the `projects` table.

use posecraft_core::status::{ProjectStatus, VariantStatus};
use posecraft_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::project::{CreateProject, Project, UpdateProject};
use crate::models::variant::{CreateVariant, Variant};
use crate::repositories::VariantRepo;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "\
    id, name, background_url, mask_url, pose_reference_url, \
    scene_type, pose_style, variant_count, controlnet_strength, guidance_scale, \
    style_reference_url, style_palette, prompt, custom_prompt, \
    status_id, total_cost, heartbeat_at, created_at, updated_at";

/// Provides CRUD operations for projects.
pub struct ProjectRepo;

impl ProjectRepo {
    /// Insert a new `pending` project, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateProject) -> Result<Project, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let project = Self::insert_inner(&mut tx, input).await?;
        tx.commit().await?;
        Ok(project)
    }

    /// Insert a project and all of its variants in one transaction, so a
    /// dispatcher never sees the project without them.
    pub async fn create_with_variants(
        pool: &PgPool,
        input: &CreateProject,
        variants: &[CreateVariant],
    ) -> Result<(Project, Vec<Variant>), sqlx::Error> {
        let mut tx = pool.begin().await?;
        let project = Self::insert_inner(&mut tx, input).await?;
        let created = VariantRepo::insert_many_inner(&mut tx, project.id, variants).await?;
        tx.commit().await?;
        Ok((project, created))
    }

    async fn insert_inner(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        input: &CreateProject,
    ) -> Result<Project, sqlx::Error> {
        let query = format!(
            "INSERT INTO projects (name, background_url, mask_url, pose_reference_url, \
                 scene_type, pose_style, variant_count, controlnet_strength, guidance_scale, \
                 style_reference_url, style_palette, prompt, custom_prompt, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(&input.name)
            .bind(&input.background_url)
            .bind(&input.mask_url)
            .bind(&input.pose_reference_url)
            .bind(input.scene_type.as_str())
            .bind(input.pose_style.as_str())
            .bind(input.variant_count)
            .bind(input.controlnet_strength)
            .bind(input.guidance_scale)
            .bind(&input.style.reference_url)
            .bind(&input.style.palette)
            .bind(&input.prompt)
            .bind(input.custom_prompt)
            .bind(ProjectStatus::Pending.id())
            .fetch_one(&mut **tx)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Project>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = $1");
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Update a project. Only non-`None` fields in `input` are applied.
    ///
    /// Returns `None` if no row with the given `id` exists.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        input: &UpdateProject,
    ) -> Result<Option<Project>, sqlx::Error> {
        let query = format!(
            "UPDATE projects SET \
                status_id = COALESCE($2, status_id), \
                total_cost = COALESCE($3, total_cost), \
                prompt = COALESCE($4, prompt), \
                mask_url = COALESCE($5, mask_url), \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .bind(input.status.map(ProjectStatus::id))
            .bind(input.total_cost)
            .bind(&input.prompt)
            .bind(&input.mask_url)
            .fetch_optional(pool)
            .await
    }

    /// Atomically claim the oldest pending project.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent dispatchers never
    /// claim the same project.
    pub async fn claim_next_pending(pool: &PgPool) -> Result<Option<Project>, sqlx::Error> {
        let query = format!(
            "UPDATE projects \
             SET status_id = $1, heartbeat_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM projects \
                 WHERE status_id = $2 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(ProjectStatus::Generating.id())
            .bind(ProjectStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Renew the run lease on a project.
    ///
    /// Returns `false` if no row with the given `id` exists.
    pub async fn touch(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE projects SET heartbeat_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move `generating` projects whose lease was last renewed before
    /// `stale_before` back to `pending`, along with their `generating`
    /// variants. Returns `(projects, variants)` moved.
    pub async fn reset_stale(pool: &PgPool, stale_before: Timestamp) -> Result<(u64, u64), sqlx::Error> {
        let mut tx = pool.begin().await?;
        let ids: Vec<DbId> = sqlx::query_scalar(
            "UPDATE projects SET status_id = $1, heartbeat_at = NULL, updated_at = NOW() \
             WHERE status_id = $2 AND (heartbeat_at IS NULL OR heartbeat_at < $3) \
             RETURNING id",
        )
        .bind(ProjectStatus::Pending.id())
        .bind(ProjectStatus::Generating.id())
        .bind(stale_before)
        .fetch_all(&mut *tx)
        .await?;

        let variants = sqlx::query(
            "UPDATE variants SET status_id = $1, updated_at = NOW() \
             WHERE status_id = $2 AND project_id = ANY($3)",
        )
        .bind(VariantStatus::Pending.id())
        .bind(VariantStatus::Generating.id())
        .bind(&ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok((ids.len() as u64, variants))
    }
}
