//! PostgreSQL-backed [`Store`].

use async_trait::async_trait;
use posecraft_core::alignment::PoseAlignment;
use posecraft_core::metrics::QualityMetrics;
use posecraft_core::status::VariantStatus;
use posecraft_core::types::{DbId, Timestamp};

use crate::error::StoreError;
use crate::models::alignment::StoredAlignment;
use crate::models::project::{CreateProject, Project, UpdateProject};
use crate::models::quality_metrics::QualityMetricsRecord;
use crate::models::variant::{CompleteVariant, CreateVariant, Variant};
use crate::repositories::{AlignmentRepo, ProjectRepo, QualityMetricsRepo, VariantRepo};
use crate::store::{check_transition, InterruptedReset, Store};
use crate::DbPool;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Explain why a guarded variant update matched no row.
    async fn rejected_transition(&self, id: DbId, to: VariantStatus) -> StoreError {
        match VariantRepo::find_by_id(&self.pool, id).await {
            Ok(Some(variant)) => match check_transition(&variant, to) {
                Err(e) => e,
                // Raced with another writer between the update and this read.
                Ok(()) => StoreError::Conflict(format!("variant {id} changed concurrently")),
            },
            Ok(None) => StoreError::NotFound { entity: "variant", id },
            Err(e) => StoreError::Database(e),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_project(&self, input: &CreateProject) -> Result<Project, StoreError> {
        Ok(ProjectRepo::create(&self.pool, input).await?)
    }

    async fn create_project_with_variants(
        &self,
        input: &CreateProject,
        variants: &[CreateVariant],
    ) -> Result<(Project, Vec<Variant>), StoreError> {
        ProjectRepo::create_with_variants(&self.pool, input, variants)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return StoreError::Conflict("duplicate variant number".to_string());
                    }
                }
                StoreError::Database(e)
            })
    }

    async fn find_project(&self, id: DbId) -> Result<Project, StoreError> {
        ProjectRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound { entity: "project", id })
    }

    async fn update_project(&self, id: DbId, input: &UpdateProject) -> Result<Project, StoreError> {
        ProjectRepo::update(&self.pool, id, input)
            .await?
            .ok_or(StoreError::NotFound { entity: "project", id })
    }

    async fn claim_next_pending_project(&self) -> Result<Option<Project>, StoreError> {
        Ok(ProjectRepo::claim_next_pending(&self.pool).await?)
    }

    async fn touch_project(&self, id: DbId) -> Result<(), StoreError> {
        if ProjectRepo::touch(&self.pool, id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound { entity: "project", id })
        }
    }

    async fn create_variants(&self, project_id: DbId, inputs: &[CreateVariant]) -> Result<Vec<Variant>, StoreError> {
        VariantRepo::create_many(&self.pool, project_id, inputs)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return StoreError::Conflict(format!("duplicate variant number for project {project_id}"));
                    }
                    if db.is_foreign_key_violation() {
                        return StoreError::NotFound {
                            entity: "project",
                            id: project_id,
                        };
                    }
                }
                StoreError::Database(e)
            })
    }

    async fn list_variants(&self, project_id: DbId) -> Result<Vec<Variant>, StoreError> {
        Ok(VariantRepo::list_by_project(&self.pool, project_id).await?)
    }

    async fn find_variant(&self, id: DbId) -> Result<Variant, StoreError> {
        VariantRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound { entity: "variant", id })
    }

    async fn start_variant(&self, id: DbId) -> Result<bool, StoreError> {
        if VariantRepo::start(&self.pool, id).await? {
            return Ok(true);
        }
        // Distinguish "not pending" from "missing".
        self.find_variant(id).await?;
        Ok(false)
    }

    async fn complete_variant(&self, id: DbId, input: &CompleteVariant) -> Result<Variant, StoreError> {
        match VariantRepo::complete(&self.pool, id, input).await? {
            Some(variant) => Ok(variant),
            None => Err(self.rejected_transition(id, VariantStatus::Completed).await),
        }
    }

    async fn fail_variant(&self, id: DbId, error_message: &str) -> Result<Variant, StoreError> {
        match VariantRepo::fail(&self.pool, id, error_message).await? {
            Some(variant) => Ok(variant),
            None => Err(self.rejected_transition(id, VariantStatus::Failed).await),
        }
    }

    async fn save_quality_metrics(&self, metrics: &QualityMetrics) -> Result<QualityMetricsRecord, StoreError> {
        Ok(QualityMetricsRepo::upsert(&self.pool, metrics).await?)
    }

    async fn find_quality_metrics(&self, project_id: DbId) -> Result<Option<QualityMetricsRecord>, StoreError> {
        Ok(QualityMetricsRepo::find_by_project(&self.pool, project_id).await?)
    }

    async fn save_alignment(&self, project_id: DbId, alignment: &PoseAlignment) -> Result<StoredAlignment, StoreError> {
        Ok(AlignmentRepo::insert(&self.pool, project_id, alignment).await?)
    }

    async fn find_latest_alignment(&self, project_id: DbId) -> Result<Option<StoredAlignment>, StoreError> {
        Ok(AlignmentRepo::find_latest(&self.pool, project_id).await?)
    }

    async fn reset_interrupted(&self, stale_before: Timestamp) -> Result<InterruptedReset, StoreError> {
        let (projects, variants) = ProjectRepo::reset_stale(&self.pool, stale_before).await?;
        if projects > 0 {
            tracing::info!(projects, variants, "Reset interrupted runs to pending");
        }
        Ok(InterruptedReset { projects, variants })
    }
}
