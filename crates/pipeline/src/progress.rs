//! Read model for polling a project's run.

use posecraft_core::status::{ProjectStatus, VariantStatus};
use posecraft_core::types::DbId;
use posecraft_db::models::variant::Variant;
use posecraft_db::Store;
use serde::Serialize;

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantProgress {
    pub id: DbId,
    pub variant_number: i16,
    pub seed: i64,
    pub status: VariantStatus,
    pub image_url: Option<String>,
    pub correction_method: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectProgress {
    pub project_id: DbId,
    pub status: ProjectStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub generating: usize,
    pub pending: usize,
    /// Terminal variants as a percentage of all variants.
    pub percentage: f64,
    pub variants: Vec<VariantProgress>,
}

impl VariantProgress {
    fn from_variant(v: &Variant) -> Result<Self, PipelineError> {
        Ok(Self {
            id: v.id,
            variant_number: v.variant_number,
            seed: v.seed,
            status: v.status()?,
            image_url: v.image_url.clone(),
            correction_method: v.correction_method.clone(),
            error_message: v.error_message.clone(),
        })
    }
}

pub async fn project_progress(store: &dyn Store, project_id: DbId) -> Result<ProjectProgress, PipelineError> {
    let project = store.find_project(project_id).await?;
    let variants = store
        .list_variants(project_id)
        .await?
        .iter()
        .map(VariantProgress::from_variant)
        .collect::<Result<Vec<_>, _>>()?;

    let count = |status: VariantStatus| variants.iter().filter(|v| v.status == status).count();
    let completed = count(VariantStatus::Completed);
    let failed = count(VariantStatus::Failed);
    let generating = count(VariantStatus::Generating);
    let pending = count(VariantStatus::Pending);
    let total = variants.len();
    let percentage = if total == 0 {
        0.0
    } else {
        (completed + failed) as f64 / total as f64 * 100.0
    };

    Ok(ProjectProgress {
        project_id,
        status: project.status()?,
        total,
        completed,
        failed,
        generating,
        pending,
        percentage,
        variants,
    })
}
