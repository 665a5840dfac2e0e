//! Scene alignment: adapting a reference pose to a background's insertion
//! geometry.
//!
//! [`SceneAligner`] extracts keypoints from the pose reference, asks the
//! scene analyzer for ranked insertion zones, and re-places each of the
//! scene's primary anchors on the best zone according to the pose style's
//! joint constraints. The result carries a geometric plausibility score.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, GeometryError};
use crate::pose::{self, AnchorClass, PoseKeypoint, Side, LEFT_HIP, RIGHT_HIP};
use crate::scene::{JointConstraints, PoseStyle, SceneType};
use crate::zones::{rank_zones, InsertionZone};

/// Limb lengths used when the reference pose does not show the limb.
pub const DEFAULT_THIGH_LENGTH: f64 = 0.12;
pub const DEFAULT_SHIN_LENGTH: f64 = 0.12;
pub const DEFAULT_TORSO_LENGTH: f64 = 0.2;

/// Hip height difference at which the symmetry check scores zero.
const HIP_SYMMETRY_TOLERANCE: f64 = 0.05;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Extracts named keypoints from a pose reference image.
///
/// Implementations must be deterministic for a given image.
#[async_trait]
pub trait PoseExtractor: Send + Sync {
    async fn extract(&self, pose_reference_url: &str) -> Result<Vec<PoseKeypoint>, CoreError>;
}

/// Proposes insertion zones for a background image.
#[async_trait]
pub trait SceneAnalyzer: Send + Sync {
    async fn propose_zones(&self, background_url: &str) -> Result<Vec<InsertionZone>, CoreError>;
}

// ---------------------------------------------------------------------------
// Alignment result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    fn distance_to(self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    fn clamped(self) -> Point {
        Point {
            x: self.x.clamp(0.0, 1.0),
            y: self.y.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypointAdaptation {
    pub original: Point,
    pub adapted: Point,
    pub confidence: f64,
    /// Euclidean distance between the original and adapted positions.
    pub shift: f64,
}

/// A pose adapted to one insertion zone. Immutable once computed;
/// re-alignment produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseAlignment {
    pub adaptations: BTreeMap<String, KeypointAdaptation>,
    pub insertion_zone: InsertionZone,
    /// Geometric plausibility in `[0, 1]`.
    pub validation_score: f64,
    pub pose_style: PoseStyle,
    pub scene_type: SceneType,
}

impl PoseAlignment {
    /// Adapted keypoints in name order, for pose conditioning.
    pub fn adapted_keypoints(&self) -> Vec<PoseKeypoint> {
        self.adaptations
            .iter()
            .map(|(name, a)| PoseKeypoint::new(name.clone(), a.adapted.x, a.adapted.y, a.confidence))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SceneAligner
// ---------------------------------------------------------------------------

pub struct SceneAligner {
    pose_extractor: Arc<dyn PoseExtractor>,
    scene_analyzer: Arc<dyn SceneAnalyzer>,
}

impl SceneAligner {
    pub fn new(pose_extractor: Arc<dyn PoseExtractor>, scene_analyzer: Arc<dyn SceneAnalyzer>) -> Self {
        Self {
            pose_extractor,
            scene_analyzer,
        }
    }

    /// Align the reference pose to the background scene.
    ///
    /// Fails with [`GeometryError::MissingReference`] before any remote call
    /// when an image is absent, and with [`GeometryError::NoInsertionZone`]
    /// when the background yields no candidate zone.
    pub async fn align(
        &self,
        background_url: Option<&str>,
        pose_reference_url: Option<&str>,
        scene_type: SceneType,
        pose_style: PoseStyle,
    ) -> Result<PoseAlignment, CoreError> {
        let background = present(background_url).ok_or(GeometryError::MissingReference("background"))?;
        let pose_reference =
            present(pose_reference_url).ok_or(GeometryError::MissingReference("pose_reference"))?;

        let mut zones = self.scene_analyzer.propose_zones(background).await?;
        rank_zones(&mut zones);
        let zone = zones.into_iter().next().ok_or(GeometryError::NoInsertionZone)?;

        let keypoints = self.pose_extractor.extract(pose_reference).await?;
        Ok(adapt_pose(&keypoints, zone, scene_type, pose_style))
    }
}

fn present(url: Option<&str>) -> Option<&str> {
    url.map(str::trim).filter(|u| !u.is_empty())
}

// ---------------------------------------------------------------------------
// Adaptation
// ---------------------------------------------------------------------------

/// Reference-pose measurements carried into the target zone.
struct Frame {
    zone_cx: f64,
    ref_cx: f64,
    baseline: f64,
    constraints: JointConstraints,
    thigh: f64,
    shin: f64,
    torso: f64,
}

impl Frame {
    fn measure(keypoints: &[PoseKeypoint], zone: &InsertionZone, scene: SceneType, style: PoseStyle) -> Self {
        let ref_cx = pose::midpoint(keypoints, LEFT_HIP, RIGHT_HIP)
            .map(|(x, _)| x)
            .or_else(|| mean_x(keypoints))
            .unwrap_or(0.5);

        let torso = match (
            pose::midpoint(keypoints, LEFT_HIP, RIGHT_HIP),
            pose::midpoint(keypoints, pose::LEFT_SHOULDER, pose::RIGHT_SHOULDER),
        ) {
            (Some((hx, hy)), Some((sx, sy))) => ((hx - sx).powi(2) + (hy - sy).powi(2)).sqrt(),
            _ => DEFAULT_TORSO_LENGTH,
        };

        Self {
            zone_cx: zone.center_x(),
            ref_cx,
            baseline: zone.avg_depth + scene.profile().surface_offset,
            constraints: style.constraints(),
            thigh: limb_length(keypoints, "hip", "knee").unwrap_or(DEFAULT_THIGH_LENGTH),
            shin: limb_length(keypoints, "knee", "ankle").unwrap_or(DEFAULT_SHIN_LENGTH),
            torso,
        }
    }

    fn recentred_x(&self, x: f64) -> f64 {
        self.zone_cx + (x - self.ref_cx)
    }

    fn hip_y(&self) -> f64 {
        self.baseline - self.constraints.hip_elevation
    }
}

fn mean_x(keypoints: &[PoseKeypoint]) -> Option<f64> {
    if keypoints.is_empty() {
        return None;
    }
    Some(keypoints.iter().map(|k| k.x).sum::<f64>() / keypoints.len() as f64)
}

/// Mean length of a limb segment over whichever sides show both joints.
fn limb_length(keypoints: &[PoseKeypoint], upper: &str, lower: &str) -> Option<f64> {
    let lengths: Vec<f64> = ["left", "right"]
        .iter()
        .filter_map(|side| {
            let a = pose::find(keypoints, &format!("{side}_{upper}"))?;
            let b = pose::find(keypoints, &format!("{side}_{lower}"))?;
            Some(a.distance_to(b))
        })
        .collect();
    if lengths.is_empty() {
        None
    } else {
        Some(lengths.iter().sum::<f64>() / lengths.len() as f64)
    }
}

fn along(origin: Point, length: f64, angle_deg: f64) -> Point {
    let rad = angle_deg.to_radians();
    Point {
        x: origin.x + length * rad.sin(),
        y: origin.y + length * rad.cos(),
    }
}

/// Adapt the scene's primary anchors onto `zone`.
///
/// Anchors missing from `keypoints` are skipped. Every adapted coordinate
/// is clamped to `[0, 1]`.
pub fn adapt_pose(
    keypoints: &[PoseKeypoint],
    zone: InsertionZone,
    scene_type: SceneType,
    pose_style: PoseStyle,
) -> PoseAlignment {
    let frame = Frame::measure(keypoints, &zone, scene_type, pose_style);
    let mut adapted: BTreeMap<String, KeypointAdaptation> = BTreeMap::new();

    for &anchor in scene_type.profile().primary_anchors {
        let Some(kp) = pose::find(keypoints, anchor) else {
            continue;
        };
        let side = Side::of(anchor);
        let target = match AnchorClass::of(anchor) {
            AnchorClass::Hip => Point {
                x: frame.recentred_x(kp.x),
                y: frame.hip_y(),
            },
            AnchorClass::Knee => {
                let hip = hip_position(&adapted, keypoints, &frame, side);
                along(hip, frame.thigh, frame.constraints.thigh_angle_deg)
            }
            AnchorClass::Ankle => {
                let knee = match adapted.get(side.knee()) {
                    Some(a) => a.adapted,
                    None => {
                        let hip = hip_position(&adapted, keypoints, &frame, side);
                        along(hip, frame.thigh, frame.constraints.thigh_angle_deg)
                    }
                };
                along(knee, frame.shin, frame.constraints.shin_angle_deg)
            }
            AnchorClass::Shoulder => {
                let hip = hip_position(&adapted, keypoints, &frame, side);
                let lean = frame.constraints.torso_lean_deg.to_radians();
                Point {
                    x: hip.x - frame.torso * lean.sin(),
                    y: hip.y - frame.torso * lean.cos(),
                }
            }
            AnchorClass::Other => Point {
                x: frame.recentred_x(kp.x),
                y: kp.y,
            },
        }
        .clamped();

        let original = Point { x: kp.x, y: kp.y };
        adapted.insert(
            anchor.to_string(),
            KeypointAdaptation {
                original,
                adapted: target,
                confidence: kp.confidence.clamp(0.0, 1.0),
                shift: original.distance_to(target),
            },
        );
    }

    let validation_score = validation_score(&adapted);
    PoseAlignment {
        adaptations: adapted,
        insertion_zone: zone,
        validation_score,
        pose_style,
        scene_type,
    }
}

/// Adapted hip on `side`, or where that hip would be placed.
fn hip_position(
    adapted: &BTreeMap<String, KeypointAdaptation>,
    keypoints: &[PoseKeypoint],
    frame: &Frame,
    side: Side,
) -> Point {
    if let Some(a) = adapted.get(side.hip()) {
        return a.adapted;
    }
    let x = pose::find(keypoints, side.hip())
        .map(|k| frame.recentred_x(k.x))
        .unwrap_or(frame.zone_cx);
    Point { x, y: frame.hip_y() }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Mean of hip symmetry, vertical ordering, and mean confidence, in `[0, 1]`.
pub fn validation_score(adapted: &BTreeMap<String, KeypointAdaptation>) -> f64 {
    let symmetry = match (adapted.get(LEFT_HIP), adapted.get(RIGHT_HIP)) {
        (Some(l), Some(r)) => (1.0 - (l.adapted.y - r.adapted.y).abs() / HIP_SYMMETRY_TOLERANCE).max(0.0),
        _ => 0.0,
    };

    let hip_ys: Vec<f64> = [LEFT_HIP, RIGHT_HIP]
        .iter()
        .filter_map(|h| adapted.get(*h).map(|a| a.adapted.y))
        .collect();
    let ordering = if hip_ys.is_empty() {
        0.5
    } else {
        let hip_y = hip_ys.iter().sum::<f64>() / hip_ys.len() as f64;
        let lower: Vec<bool> = adapted
            .iter()
            .filter(|(name, _)| AnchorClass::of(name) == AnchorClass::Ankle)
            .map(|(_, a)| a.adapted.y >= hip_y)
            .collect();
        if lower.is_empty() {
            0.5
        } else {
            lower.iter().filter(|ok| **ok).count() as f64 / lower.len() as f64
        }
    };

    let confidence = if adapted.is_empty() {
        0.0
    } else {
        (adapted.values().map(|a| a.confidence).sum::<f64>() / adapted.len() as f64).max(0.0)
    };

    ((symmetry + ordering + confidence) / 3.0).clamp(0.0, 1.0)
}
