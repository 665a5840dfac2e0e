//! Generation-and-correction orchestration.
//!
//! - [`orchestrator::VariantOrchestrator`] runs a project's variants.
//! - [`arbiter::CorrectionArbiter`] picks among concurrent corrections.
//! - [`detector`] adapts image loading to the core's analysis traits.
//! - [`projects::ProjectService`] creates projects.
//! - [`alignment::ProjectAligner`] aligns them, deriving a mask when needed.
//! - [`queue::RunQueue`] and [`dispatcher::ProjectDispatcher`] run pending
//!   projects in the background.
//! - [`progress::project_progress`] is the polling read model.

pub mod alignment;
pub mod arbiter;
pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod projects;
pub mod queue;

pub use alignment::ProjectAligner;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use orchestrator::{PipelineBackends, RunOutcome, VariantOrchestrator};
