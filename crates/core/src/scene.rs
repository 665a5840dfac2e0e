//! Scene typologies, pose styles, and their per-key configuration tables.
//!
//! Both keys are closed enums. Parsing an unknown name is a validation
//! error; there is no fallback to a default scene.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::pose::{
    LEFT_ANKLE, LEFT_HIP, LEFT_KNEE, LEFT_SHOULDER, RIGHT_ANKLE, RIGHT_HIP, RIGHT_KNEE,
    RIGHT_SHOULDER,
};

// ---------------------------------------------------------------------------
// Scene type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneType {
    Pool,
    Terrace,
    Spa,
    Interior,
}

pub const VALID_SCENE_TYPES: &[&str] = &["pool", "terrace", "spa", "interior"];

impl SceneType {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pool" => Ok(Self::Pool),
            "terrace" => Ok(Self::Terrace),
            "spa" => Ok(Self::Spa),
            "interior" => Ok(Self::Interior),
            other => Err(CoreError::Validation(format!(
                "Unknown scene type '{other}'. Must be one of: {}",
                VALID_SCENE_TYPES.join(", ")
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pool => "pool",
            Self::Terrace => "terrace",
            Self::Spa => "spa",
            Self::Interior => "interior",
        }
    }

    /// Static placement profile for this scene.
    pub fn profile(self) -> &'static SceneProfile {
        match self {
            Self::Pool => &POOL_PROFILE,
            Self::Terrace => &TERRACE_PROFILE,
            Self::Spa => &SPA_PROFILE,
            Self::Interior => &INTERIOR_PROFILE,
        }
    }
}

/// Placement rules for one scene typology.
#[derive(Debug)]
pub struct SceneProfile {
    /// Keypoints adapted to the insertion zone, in adaptation order.
    /// Hips must precede knees and knees must precede ankles.
    pub primary_anchors: &'static [&'static str],
    /// Offset added to the zone's surface depth to obtain the baseline the
    /// subject rests on (normalized image height).
    pub surface_offset: f64,
    /// Subject description used as the first clause of generation prompts.
    pub base_prompt: &'static str,
}

static POOL_PROFILE: SceneProfile = SceneProfile {
    primary_anchors: &[
        LEFT_HIP,
        RIGHT_HIP,
        LEFT_KNEE,
        RIGHT_KNEE,
        LEFT_ANKLE,
        RIGHT_ANKLE,
        LEFT_SHOULDER,
        RIGHT_SHOULDER,
    ],
    surface_offset: 0.0,
    base_prompt: "elegant woman in flowing sundress at infinity pool edge",
};

static TERRACE_PROFILE: SceneProfile = SceneProfile {
    primary_anchors: &[
        LEFT_HIP,
        RIGHT_HIP,
        LEFT_KNEE,
        RIGHT_KNEE,
        LEFT_ANKLE,
        RIGHT_ANKLE,
        LEFT_SHOULDER,
        RIGHT_SHOULDER,
        "left_wrist",
        "right_wrist",
    ],
    surface_offset: 0.01,
    base_prompt: "sophisticated woman on modern rooftop terrace",
};

static SPA_PROFILE: SceneProfile = SceneProfile {
    primary_anchors: &[
        LEFT_HIP,
        RIGHT_HIP,
        LEFT_KNEE,
        RIGHT_KNEE,
        LEFT_SHOULDER,
        RIGHT_SHOULDER,
        "nose",
    ],
    surface_offset: 0.02,
    base_prompt: "serene woman in tranquil spa setting",
};

static INTERIOR_PROFILE: SceneProfile = SceneProfile {
    primary_anchors: &[
        LEFT_HIP,
        RIGHT_HIP,
        LEFT_KNEE,
        RIGHT_KNEE,
        LEFT_ANKLE,
        RIGHT_ANKLE,
        LEFT_SHOULDER,
        RIGHT_SHOULDER,
        "nose",
    ],
    surface_offset: 0.0,
    base_prompt: "refined woman in luxurious interior space",
};

// ---------------------------------------------------------------------------
// Pose style
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseStyle {
    Standing,
    SeatedEdge,
    Reclining,
}

pub const VALID_POSE_STYLES: &[&str] = &["standing", "seated_edge", "reclining"];

impl PoseStyle {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "standing" => Ok(Self::Standing),
            "seated_edge" => Ok(Self::SeatedEdge),
            "reclining" => Ok(Self::Reclining),
            other => Err(CoreError::Validation(format!(
                "Unknown pose style '{other}'. Must be one of: {}",
                VALID_POSE_STYLES.join(", ")
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standing => "standing",
            Self::SeatedEdge => "seated_edge",
            Self::Reclining => "reclining",
        }
    }

    pub fn constraints(self) -> JointConstraints {
        match self {
            Self::Standing => JointConstraints {
                hip_elevation: 0.30,
                thigh_angle_deg: 0.0,
                shin_angle_deg: 0.0,
                torso_lean_deg: 0.0,
            },
            Self::SeatedEdge => JointConstraints {
                hip_elevation: 0.02,
                thigh_angle_deg: 80.0,
                shin_angle_deg: 5.0,
                torso_lean_deg: 5.0,
            },
            Self::Reclining => JointConstraints {
                hip_elevation: 0.04,
                thigh_angle_deg: 80.0,
                shin_angle_deg: 85.0,
                torso_lean_deg: 60.0,
            },
        }
    }
}

/// Joint placement constraints for a pose style.
///
/// Angles are measured from straight down (`0°`) towards the subject's
/// facing direction (`+x`). They must stay below 90° so lower limbs end up
/// beneath the hips.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointConstraints {
    /// Height of the hips above the surface baseline (normalized).
    pub hip_elevation: f64,
    pub thigh_angle_deg: f64,
    pub shin_angle_deg: f64,
    /// Backwards lean of the torso from vertical.
    pub torso_lean_deg: f64,
}
