//! Backend contracts consumed by the pipeline.

use async_trait::async_trait;
use image::DynamicImage;
use posecraft_core::metrics::QualityScores;
use posecraft_core::pose::PoseKeypoint;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Everything needed for one deterministic generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub background_url: String,
    pub mask_url: String,
    /// Pose conditioning image for the ControlNet.
    pub pose_reference_url: String,
    pub prompt: String,
    pub controlnet_strength: f64,
    pub guidance_scale: f64,
    pub seed: i64,
    /// Keypoints adapted to the background scene.
    pub keypoints: Vec<PoseKeypoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub image_url: String,
    pub generation_time_secs: f64,
    pub backend_request_id: String,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError>;
}

// ---------------------------------------------------------------------------
// Correction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionRequest {
    pub image_url: String,
    pub mask_url: String,
    pub issue_descriptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionOutput {
    pub image_url: String,
    pub processing_time_ms: u64,
}

/// One correction strategy.
#[async_trait]
pub trait CorrectionBackend: Send + Sync {
    /// Name the strategy is registered and scored under.
    fn method(&self) -> &str;

    async fn correct(&self, request: &CorrectionRequest) -> Result<CorrectionOutput, BackendError>;
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRequest {
    pub original_url: String,
    pub generated_url: String,
    pub mask_url: String,
    pub style_reference_url: Option<String>,
}

#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(&self, request: &ScoreRequest) -> Result<QualityScores, BackendError>;
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Fetches and decodes an image by URL.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<DynamicImage, BackendError>;
}
