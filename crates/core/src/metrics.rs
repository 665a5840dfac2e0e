//! Quality scores and the project-level metrics rollup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::status::VariantStatus;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Per-image scores
// ---------------------------------------------------------------------------

const SSIM_WEIGHT: f64 = 0.3;
const POSE_WEIGHT: f64 = 0.3;
const STYLE_WEIGHT: f64 = 0.2;
const COLOR_WEIGHT: f64 = 0.2;
/// Colour delta at which the normalised colour term reaches zero.
const COLOR_DELTA_SCALE: f64 = 10.0;

/// Scores returned by the quality-scoring backend for one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub ssim: f64,
    pub pose_accuracy: f64,
    /// Perceptual colour difference (ΔE00); lower is better.
    pub color_delta: f64,
    pub style_consistency: Option<f64>,
}

/// Weighted overall quality in `[0, 1]`.
///
/// Without a style score the remaining weights are renormalised so that
/// images without a style target are not capped below 1.
pub fn overall_quality(scores: &QualityScores) -> f64 {
    let color = (1.0 - scores.color_delta / COLOR_DELTA_SCALE).max(0.0);
    let mut weighted = SSIM_WEIGHT * scores.ssim + POSE_WEIGHT * scores.pose_accuracy + COLOR_WEIGHT * color;
    let mut total_weight = SSIM_WEIGHT + POSE_WEIGHT + COLOR_WEIGHT;
    if let Some(style) = scores.style_consistency {
        weighted += STYLE_WEIGHT * style;
        total_weight += STYLE_WEIGHT;
    }
    (weighted / total_weight).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// The slice of a variant the aggregator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSummary {
    pub status: VariantStatus,
    pub generation_time_secs: Option<f64>,
    pub quality: Option<QualityScores>,
    pub correction_method: Option<String>,
    pub correction_score: Option<f64>,
}

/// Project-level rollup over completed variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub project_id: DbId,
    pub avg_generation_time: f64,
    pub avg_ssim: f64,
    pub avg_pose_accuracy: f64,
    pub avg_color_delta: f64,
    pub avg_style_consistency: f64,
    pub success_rate: f64,
    pub completed_count: u32,
    pub total_count: u32,
    /// Mean correction score grouped by the winning method.
    pub method_effectiveness: BTreeMap<String, f64>,
    pub recommendations: Vec<String>,
}

impl QualityMetrics {
    fn empty(project_id: DbId, total_count: u32) -> Self {
        Self {
            project_id,
            avg_generation_time: 0.0,
            avg_ssim: 0.0,
            avg_pose_accuracy: 0.0,
            avg_color_delta: 0.0,
            avg_style_consistency: 0.0,
            success_rate: 0.0,
            completed_count: 0,
            total_count,
            method_effectiveness: BTreeMap::new(),
            recommendations: Vec::new(),
        }
    }
}

/// Targets a metric mean is compared against for recommendations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub ssim: f64,
    pub pose_accuracy: f64,
    /// Maximum acceptable colour delta.
    pub color_delta: f64,
    pub style_consistency: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            ssim: 0.92,
            pose_accuracy: 0.8,
            color_delta: 3.0,
            style_consistency: 0.8,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    thresholds: QualityThresholds,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0u32), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / f64::from(n))
}

impl MetricsAggregator {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    /// Roll up `variants`. Never fails: no completed variants yields zeros
    /// and no recommendations.
    pub fn aggregate(&self, project_id: DbId, variants: &[VariantSummary]) -> QualityMetrics {
        let total = variants.len() as u32;
        let completed: Vec<&VariantSummary> = variants
            .iter()
            .filter(|v| v.status == VariantStatus::Completed)
            .collect();
        if completed.is_empty() {
            return QualityMetrics::empty(project_id, total);
        }

        let scores: Vec<&QualityScores> = completed.iter().filter_map(|v| v.quality.as_ref()).collect();
        let avg_ssim = mean(scores.iter().map(|s| s.ssim));
        let avg_pose = mean(scores.iter().map(|s| s.pose_accuracy));
        let avg_delta = mean(scores.iter().map(|s| s.color_delta));
        let avg_style = mean(scores.iter().filter_map(|s| s.style_consistency));

        let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for v in &completed {
            if let (Some(method), Some(score)) = (&v.correction_method, v.correction_score) {
                grouped.entry(method.clone()).or_default().push(score);
            }
        }
        let method_effectiveness = grouped
            .into_iter()
            .filter_map(|(method, values)| mean(values.into_iter()).map(|m| (method, m)))
            .collect();

        QualityMetrics {
            project_id,
            avg_generation_time: mean(completed.iter().filter_map(|v| v.generation_time_secs)).unwrap_or(0.0),
            avg_ssim: avg_ssim.unwrap_or(0.0),
            avg_pose_accuracy: avg_pose.unwrap_or(0.0),
            avg_color_delta: avg_delta.unwrap_or(0.0),
            avg_style_consistency: avg_style.unwrap_or(0.0),
            success_rate: completed.len() as f64 / f64::from(total),
            completed_count: completed.len() as u32,
            total_count: total,
            method_effectiveness,
            recommendations: self.recommendations(avg_ssim, avg_pose, avg_delta, avg_style),
        }
    }

    fn recommendations(
        &self,
        ssim: Option<f64>,
        pose: Option<f64>,
        delta: Option<f64>,
        style: Option<f64>,
    ) -> Vec<String> {
        let t = &self.thresholds;
        let mut out = Vec::new();

        if let Some(v) = ssim {
            out.push(if v >= t.ssim {
                format!("Background preservation meets target (SSIM {v:.3})")
            } else {
                format!(
                    "Background preservation below target (SSIM {v:.3} < {:.2}); tighten the inpainting mask",
                    t.ssim
                )
            });
        }
        if let Some(v) = pose {
            out.push(if v >= t.pose_accuracy {
                format!("Pose accuracy meets target ({v:.2})")
            } else {
                format!(
                    "Pose accuracy below target ({v:.2} < {:.2}); increase ControlNet strength",
                    t.pose_accuracy
                )
            });
        }
        if let Some(v) = delta {
            out.push(if v <= t.color_delta {
                format!("Colour harmony within tolerance (ΔE {v:.1})")
            } else {
                format!(
                    "Colour mismatch at mask edges (ΔE {v:.1} > {:.1}); refine the colour harmony prompt",
                    t.color_delta
                )
            });
        }
        if let Some(v) = style {
            out.push(if v >= t.style_consistency {
                format!("Style consistency meets target ({v:.2})")
            } else {
                format!(
                    "Style consistency below target ({v:.2} < {:.2}); provide a closer style reference",
                    t.style_consistency
                )
            });
        }
        out
    }
}
