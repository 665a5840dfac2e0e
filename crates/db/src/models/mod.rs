//! Row models and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row, plus the create/update DTOs the [`crate::Store`]
//! operations accept.

pub mod alignment;
pub mod project;
pub mod quality_metrics;
pub mod variant;
