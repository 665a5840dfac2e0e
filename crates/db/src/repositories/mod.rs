//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async queries that
//! accept `&PgPool` (or an open transaction) as the first argument.

pub mod alignment_repo;
pub mod project_repo;
pub mod quality_metrics_repo;
pub mod variant_repo;

pub use alignment_repo::AlignmentRepo;
pub use project_repo::ProjectRepo;
pub use quality_metrics_repo::QualityMetricsRepo;
pub use variant_repo::VariantRepo;
