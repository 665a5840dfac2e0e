//! The storage collaborator contract.
//!
//! Every operation is atomic per entity. Variant status changes go through
//! the state machine in [`VariantStatus::can_transition_to`]; a store must
//! reject transitions it does not allow rather than overwrite terminal
//! rows.

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

/// Rows moved back to `pending` by [`Store::reset_interrupted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptedReset {
    pub projects: u64,
    pub variants: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- projects --

    async fn create_project(&self, input: &CreateProject) -> Result<Project, StoreError>;

    /// Create a project together with its variants as one atomic write.
    /// Nothing is stored if any part fails.
    async fn create_project_with_variants(
        &self,
        input: &CreateProject,
        variants: &[CreateVariant],
    ) -> Result<(Project, Vec<Variant>), StoreError>;

    async fn find_project(&self, id: DbId) -> Result<Project, StoreError>;

    async fn update_project(&self, id: DbId, input: &UpdateProject) -> Result<Project, StoreError>;

    /// Atomically move the oldest `pending` project to `generating`, start
    /// its run lease and return it. Concurrent callers never claim the same
    /// project.
    async fn claim_next_pending_project(&self) -> Result<Option<Project>, StoreError>;

    /// Renew the run lease of a project.
    async fn touch_project(&self, id: DbId) -> Result<(), StoreError>;

    // -- variants --

    async fn create_variants(&self, project_id: DbId, inputs: &[CreateVariant]) -> Result<Vec<Variant>, StoreError>;

    /// All variants of a project in `variant_number` order.
    async fn list_variants(&self, project_id: DbId) -> Result<Vec<Variant>, StoreError>;

    async fn find_variant(&self, id: DbId) -> Result<Variant, StoreError>;

    /// Compare-and-set `pending -> generating`. Returns `false` (and changes
    /// nothing) when the variant is not `pending`.
    async fn start_variant(&self, id: DbId) -> Result<bool, StoreError>;

    /// `generating -> completed` with the final image, scores, and method.
    async fn complete_variant(&self, id: DbId, input: &CompleteVariant) -> Result<Variant, StoreError>;

    /// `pending | generating -> failed`. Clears correction fields.
    async fn fail_variant(&self, id: DbId, error_message: &str) -> Result<Variant, StoreError>;

    // -- quality metrics --

    /// Insert or replace the project's single metrics record.
    async fn save_quality_metrics(&self, metrics: &QualityMetrics) -> Result<QualityMetricsRecord, StoreError>;

    async fn find_quality_metrics(&self, project_id: DbId) -> Result<Option<QualityMetricsRecord>, StoreError>;

    // -- alignments --

    async fn save_alignment(&self, project_id: DbId, alignment: &PoseAlignment) -> Result<StoredAlignment, StoreError>;

    async fn find_latest_alignment(&self, project_id: DbId) -> Result<Option<StoredAlignment>, StoreError>;

    // -- recovery --

    /// Move `generating` projects whose lease was last renewed before
    /// `stale_before`, and their `generating` variants, back to `pending`.
    /// Projects with a live lease belong to a running worker and are left
    /// alone.
    async fn reset_interrupted(&self, stale_before: Timestamp) -> Result<InterruptedReset, StoreError>;
}

/// Check a variant transition against the state machine.
pub(crate) fn check_transition(variant: &Variant, to: VariantStatus) -> Result<(), StoreError> {
    let from = variant.status()?;
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            entity: "variant",
            id: variant.id,
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}
