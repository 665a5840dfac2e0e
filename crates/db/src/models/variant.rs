//! Variant entity model and DTOs.

use posecraft_core::error::CoreError;
use posecraft_core::metrics::{QualityScores, VariantSummary};
use posecraft_core::status::{StatusId, VariantStatus};
use posecraft_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A variant row from the `variants` table.
///
/// Quality scores are flattened into nullable columns; they are all set
/// together when the variant completes.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Variant {
    pub id: DbId,
    pub project_id: DbId,
    pub variant_number: i16,
    pub seed: i64,
    pub status_id: StatusId,
    pub image_url: Option<String>,
    pub generation_time_secs: Option<f64>,
    pub backend_request_id: Option<String>,
    pub ssim: Option<f64>,
    pub pose_accuracy: Option<f64>,
    pub color_delta: Option<f64>,
    pub style_consistency: Option<f64>,
    /// Non-empty only when the variant is completed.
    pub correction_method: Option<String>,
    pub correction_score: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Variant {
    pub fn status(&self) -> Result<VariantStatus, CoreError> {
        VariantStatus::from_id(self.status_id)
    }

    pub fn quality_scores(&self) -> Option<QualityScores> {
        Some(QualityScores {
            ssim: self.ssim?,
            pose_accuracy: self.pose_accuracy?,
            color_delta: self.color_delta?,
            style_consistency: self.style_consistency,
        })
    }

    pub fn summary(&self) -> Result<VariantSummary, CoreError> {
        Ok(VariantSummary {
            status: self.status()?,
            generation_time_secs: self.generation_time_secs,
            quality: self.quality_scores(),
            correction_method: self.correction_method.clone(),
            correction_score: self.correction_score,
        })
    }
}

/// DTO for creating a variant under a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CreateVariant {
    pub variant_number: i16,
    pub seed: i64,
}

/// Fields written when a variant completes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompleteVariant {
    pub image_url: String,
    pub generation_time_secs: f64,
    pub backend_request_id: Option<String>,
    pub scores: QualityScores,
    pub correction_method: String,
    pub correction_score: f64,
}
