//! Remote collaborators of the generation pipeline.
//!
//! Each backend is an object-safe trait in [`traits`] with an HTTP
//! implementation alongside it:
//!
//! - [`comfy`]: inpainting + ControlNet generation through a ComfyUI-style
//!   workflow API.
//! - [`correction`]: one HTTP endpoint per correction strategy.
//! - [`scoring`]: the quality-scoring service.
//! - [`pose`]: the pose-keypoint service.
//! - [`images`]: image loading from `http(s)://` and `file://` URLs.
//!
//! Failures are reported as [`BackendError`]; [`retry`] and [`timeout`]
//! bound how long any call may take.

pub mod comfy;
pub mod correction;
pub mod error;
pub mod images;
pub mod pose;
pub mod retry;
pub mod scoring;
pub mod timeout;
pub mod traits;

pub use error::BackendError;
pub use traits::{
    CorrectionBackend, CorrectionOutput, CorrectionRequest, GenerationBackend, GenerationOutput,
    GenerationRequest, ImageLoader, QualityScorer, ScoreRequest,
};
