//! Project quality metrics row.

use std::collections::BTreeMap;

use posecraft_core::metrics::QualityMetrics;
use posecraft_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `quality_metrics` table. One per project.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct QualityMetricsRecord {
    pub id: DbId,
    pub project_id: DbId,
    pub avg_generation_time: f64,
    pub avg_ssim: f64,
    pub avg_pose_accuracy: f64,
    pub avg_color_delta: f64,
    pub avg_style_consistency: f64,
    pub success_rate: f64,
    pub completed_count: i32,
    pub total_count: i32,
    pub method_effectiveness: Json<BTreeMap<String, f64>>,
    pub recommendations: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl QualityMetricsRecord {
    pub fn to_metrics(&self) -> QualityMetrics {
        QualityMetrics {
            project_id: self.project_id,
            avg_generation_time: self.avg_generation_time,
            avg_ssim: self.avg_ssim,
            avg_pose_accuracy: self.avg_pose_accuracy,
            avg_color_delta: self.avg_color_delta,
            avg_style_consistency: self.avg_style_consistency,
            success_rate: self.success_rate,
            completed_count: self.completed_count.max(0) as u32,
            total_count: self.total_count.max(0) as u32,
            method_effectiveness: self.method_effectiveness.0.clone(),
            recommendations: self.recommendations.clone(),
        }
    }
}
