//! Defect detection for generated composites.
//!
//! The [`IssueDetector`] trait is the pipeline seam; [`detect_pixel_issues`]
//! is the deterministic comparison behind the default implementation. It
//! compares the generated image against the original background using the
//! inpainting mask:
//!
//! - changed pixels outside the mask are artifacts, or a duplicated subject
//!   when their mass rivals the mask area;
//! - the centroid of changed pixels inside the mask should sit on the mask
//!   centroid, otherwise the subject has drifted;
//! - the subject's mean luminance should be close to its surroundings;
//! - the subject's colour embedding should match the style target.

use async_trait::async_trait;
use image::{imageops, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::style::{cosine_similarity, StyleContext, StyleEmbedder};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    PoseDrift,
    Artifact,
    Duplicate,
    LightingMismatch,
    StyleInconsistency,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PoseDrift => "pose_drift",
            Self::Artifact => "artifact",
            Self::Duplicate => "duplicate",
            Self::LightingMismatch => "lighting_mismatch",
            Self::StyleInconsistency => "style_inconsistency",
        }
    }
}

/// Normalized bounding box of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IssueLocation {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedIssue {
    pub issue_type: IssueType,
    /// In `[0, 1]`.
    pub severity: f64,
    pub location: Option<IssueLocation>,
    pub description: String,
}

impl DetectedIssue {
    fn new(issue_type: IssueType, severity: f64, location: Option<IssueLocation>, description: String) -> Self {
        Self {
            issue_type,
            severity: severity.clamp(0.0, 1.0),
            location,
            description,
        }
    }
}

/// Inputs for one detection call.
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub generated_url: String,
    pub background_url: String,
    pub mask_url: String,
    pub style: StyleContext,
}

/// Flags defects in a generated image. Must be deterministic for identical
/// inputs; an empty list is a normal outcome.
#[async_trait]
pub trait IssueDetector: Send + Sync {
    async fn detect(&self, request: &DetectionRequest) -> Result<Vec<DetectedIssue>, CoreError>;
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
    /// Mean absolute channel difference above which a pixel counts as changed.
    pub changed_pixel_delta: f64,
    /// Outside-mask changed fraction above which artifacts are reported.
    pub artifact_ratio: f64,
    /// Outside-mask changed mass, relative to the mask area, that indicates a
    /// second copy of the subject.
    pub duplicate_mass: f64,
    /// Centroid offset (fraction of the image diagonal) that counts as drift.
    pub drift_distance: f64,
    /// Luminance gap (fraction of full scale) between subject and surroundings.
    pub lighting_gap: f64,
    /// Minimum style similarity to the target.
    pub style_similarity: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            changed_pixel_delta: 30.0,
            artifact_ratio: 0.02,
            duplicate_mass: 0.5,
            drift_distance: 0.05,
            lighting_gap: 0.25,
            style_similarity: 0.8,
        }
    }
}

// ---------------------------------------------------------------------------
// Pixel comparison
// ---------------------------------------------------------------------------

const MASK_ON: u8 = 128;

fn luma(p: &image::Rgb<u8>) -> f64 {
    let [r, g, b] = p.0;
    0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    sum_x: f64,
    sum_y: f64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl Accumulator {
    fn add(&mut self, x: u32, y: u32) {
        if self.count == 0 {
            (self.min_x, self.min_y, self.max_x, self.max_y) = (x, y, x, y);
        } else {
            self.min_x = self.min_x.min(x);
            self.min_y = self.min_y.min(y);
            self.max_x = self.max_x.max(x);
            self.max_y = self.max_y.max(y);
        }
        self.count += 1;
        self.sum_x += f64::from(x);
        self.sum_y += f64::from(y);
    }

    fn centroid(&self) -> Option<(f64, f64)> {
        (self.count > 0).then(|| (self.sum_x / self.count as f64, self.sum_y / self.count as f64))
    }

    fn bounds(&self, w: u32, h: u32) -> Option<IssueLocation> {
        (self.count > 0).then(|| IssueLocation {
            x: f64::from(self.min_x) / f64::from(w),
            y: f64::from(self.min_y) / f64::from(h),
            width: f64::from(self.max_x - self.min_x + 1) / f64::from(w),
            height: f64::from(self.max_y - self.min_y + 1) / f64::from(h),
        })
    }
}

/// Compare `generated` against `background` under `mask`.
///
/// `generated` and `mask` are resized to the background's dimensions when
/// they differ. `style_target` is a pre-computed embedding of the style
/// reference or palette; style is not checked without one. Issues are
/// returned in [`IssueType`] order.
pub fn detect_pixel_issues(
    generated: &RgbImage,
    background: &RgbImage,
    mask: &GrayImage,
    style_target: Option<&[f64]>,
    embedder: &dyn StyleEmbedder,
    thresholds: &DetectionThresholds,
) -> Vec<DetectedIssue> {
    let (w, h) = background.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let generated = fit(generated, w, h);
    let mask = fit_mask(mask, w, h);
    let inside = |x: u32, y: u32| mask.get_pixel(x, y).0[0] >= MASK_ON;

    let mut mask_acc = Accumulator::default();
    let mut inside_changed = Accumulator::default();
    let mut outside_changed = Accumulator::default();
    let (mut luma_in, mut luma_out) = (0.0, 0.0);

    for (x, y, bg) in background.enumerate_pixels() {
        let out = generated.get_pixel(x, y);
        let delta = out
            .0
            .iter()
            .zip(bg.0.iter())
            .map(|(a, b)| (f64::from(*a) - f64::from(*b)).abs())
            .sum::<f64>()
            / 3.0;
        let changed = delta > thresholds.changed_pixel_delta;

        if inside(x, y) {
            mask_acc.add(x, y);
            luma_in += luma(out);
            if changed {
                inside_changed.add(x, y);
            }
        } else {
            luma_out += luma(out);
            if changed {
                outside_changed.add(x, y);
            }
        }
    }

    let total = u64::from(w) * u64::from(h);
    let mask_area = mask_acc.count;
    let outside_area = total - mask_area;
    let mut issues = Vec::new();

    // -- pose drift --
    if let Some((mx, my)) = mask_acc.centroid() {
        match inside_changed.centroid() {
            None => issues.push(DetectedIssue::new(
                IssueType::PoseDrift,
                1.0,
                mask_acc.bounds(w, h),
                "No subject rendered inside the pose mask".to_string(),
            )),
            Some((cx, cy)) => {
                let diagonal = (f64::from(w).powi(2) + f64::from(h).powi(2)).sqrt();
                let drift = ((cx - mx).powi(2) + (cy - my).powi(2)).sqrt() / diagonal;
                if drift > thresholds.drift_distance {
                    issues.push(DetectedIssue::new(
                        IssueType::PoseDrift,
                        5.0 * drift,
                        inside_changed.bounds(w, h),
                        format!("Subject centroid drifted {:.1}% of the frame from the pose target", drift * 100.0),
                    ));
                }
            }
        }
    }

    // -- artifact / duplicate --
    if outside_changed.count > 0 {
        let mass = if mask_area > 0 {
            outside_changed.count as f64 / mask_area as f64
        } else {
            0.0
        };
        let ratio = if outside_area > 0 {
            outside_changed.count as f64 / outside_area as f64
        } else {
            0.0
        };
        if mask_area > 0 && mass >= thresholds.duplicate_mass {
            issues.push(DetectedIssue::new(
                IssueType::Duplicate,
                mass,
                outside_changed.bounds(w, h),
                "Subject content repeated outside the pose mask".to_string(),
            ));
        } else if ratio > thresholds.artifact_ratio {
            issues.push(DetectedIssue::new(
                IssueType::Artifact,
                ratio * 10.0,
                outside_changed.bounds(w, h),
                format!("{:.1}% of the background changed outside the mask", ratio * 100.0),
            ));
        }
    }

    // -- lighting --
    if mask_area > 0 && outside_area > 0 {
        let subject = luma_in / mask_area as f64;
        let surroundings = luma_out / outside_area as f64;
        let gap = (subject - surroundings).abs() / 255.0;
        if gap > thresholds.lighting_gap {
            issues.push(DetectedIssue::new(
                IssueType::LightingMismatch,
                2.0 * gap,
                mask_acc.bounds(w, h),
                format!(
                    "Subject is {} than its surroundings",
                    if subject > surroundings { "brighter" } else { "darker" }
                ),
            ));
        }
    }

    // -- style --
    if let Some(target) = style_target.filter(|_| mask_area > 0) {
        let include: &dyn Fn(u32, u32) -> bool = &inside;
        let subject = embedder.embed(&generated, Some(include));
        let similarity = cosine_similarity(&subject, target);
        if similarity < thresholds.style_similarity {
            issues.push(DetectedIssue::new(
                IssueType::StyleInconsistency,
                1.0 - similarity,
                mask_acc.bounds(w, h),
                format!("Subject palette similarity {similarity:.2} below style target"),
            ));
        }
    }

    issues.sort_by_key(|i| i.issue_type);
    issues
}

fn fit(image: &RgbImage, w: u32, h: u32) -> RgbImage {
    if image.dimensions() == (w, h) {
        image.clone()
    } else {
        imageops::resize(image, w, h, imageops::FilterType::Triangle)
    }
}

fn fit_mask(mask: &GrayImage, w: u32, h: u32) -> GrayImage {
    if mask.dimensions() == (w, h) {
        mask.clone()
    } else {
        imageops::resize(mask, w, h, imageops::FilterType::Nearest)
    }
}
