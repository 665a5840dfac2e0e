//! Pose keypoints and anchor classification.
//!
//! Keypoints use normalized `[0, 1]` image coordinates with `y` growing
//! downwards, so "below" means a larger `y`.

use serde::{Deserialize, Serialize};

pub const LEFT_HIP: &str = "left_hip";
pub const RIGHT_HIP: &str = "right_hip";
pub const LEFT_KNEE: &str = "left_knee";
pub const RIGHT_KNEE: &str = "right_knee";
pub const LEFT_ANKLE: &str = "left_ankle";
pub const RIGHT_ANKLE: &str = "right_ankle";
pub const LEFT_SHOULDER: &str = "left_shoulder";
pub const RIGHT_SHOULDER: &str = "right_shoulder";
pub const LEFT_ELBOW: &str = "left_elbow";
pub const RIGHT_ELBOW: &str = "right_elbow";
pub const LEFT_WRIST: &str = "left_wrist";
pub const RIGHT_WRIST: &str = "right_wrist";

/// A named anatomical landmark extracted from a pose reference image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseKeypoint {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
}

impl PoseKeypoint {
    pub fn new(name: impl Into<String>, x: f64, y: f64, confidence: f64) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            confidence,
        }
    }

    pub fn distance_to(&self, other: &PoseKeypoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Look up a keypoint by name.
pub fn find<'a>(keypoints: &'a [PoseKeypoint], name: &str) -> Option<&'a PoseKeypoint> {
    keypoints.iter().find(|k| k.name == name)
}

/// Midpoint of two named keypoints, or of whichever one is present.
pub fn midpoint(keypoints: &[PoseKeypoint], a: &str, b: &str) -> Option<(f64, f64)> {
    match (find(keypoints, a), find(keypoints, b)) {
        (Some(p), Some(q)) => Some(((p.x + q.x) / 2.0, (p.y + q.y) / 2.0)),
        (Some(p), None) | (None, Some(p)) => Some((p.x, p.y)),
        (None, None) => None,
    }
}

/// Body side encoded in a keypoint name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Center,
}

impl Side {
    pub fn of(name: &str) -> Self {
        if name.starts_with("left_") {
            Self::Left
        } else if name.starts_with("right_") {
            Self::Right
        } else {
            Self::Center
        }
    }

    /// Name of the hip keypoint on this side (center maps to the left hip).
    pub fn hip(self) -> &'static str {
        match self {
            Self::Right => RIGHT_HIP,
            Self::Left | Self::Center => LEFT_HIP,
        }
    }

    pub fn knee(self) -> &'static str {
        match self {
            Self::Right => RIGHT_KNEE,
            Self::Left | Self::Center => LEFT_KNEE,
        }
    }
}

/// Adaptation class of an anchor keypoint. Each class has its own
/// placement formula in [`crate::alignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorClass {
    Hip,
    Knee,
    Ankle,
    Shoulder,
    /// Anything else: re-centred horizontally, height untouched.
    Other,
}

impl AnchorClass {
    pub fn of(name: &str) -> Self {
        if name.ends_with("hip") {
            Self::Hip
        } else if name.ends_with("knee") {
            Self::Knee
        } else if name.ends_with("ankle") {
            Self::Ankle
        } else if name.ends_with("shoulder") {
            Self::Shoulder
        } else {
            Self::Other
        }
    }
}
