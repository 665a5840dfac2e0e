//! Project entity model and DTOs.

use posecraft_core::error::CoreError;
use posecraft_core::scene::{PoseStyle, SceneType};
use posecraft_core::status::{ProjectStatus, StatusId};
use posecraft_core::style::StyleContext;
use posecraft_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A project row from the `projects` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Project {
    pub id: DbId,
    pub name: String,
    pub background_url: String,
    /// Inpainting mask. Absent until one is derived from the aligned pose.
    pub mask_url: Option<String>,
    pub pose_reference_url: String,
    pub scene_type: String,
    pub pose_style: String,
    pub variant_count: i16,
    pub controlnet_strength: f64,
    pub guidance_scale: f64,
    pub style_reference_url: Option<String>,
    pub style_palette: Vec<String>,
    /// Effective generation prompt.
    pub prompt: String,
    /// True when `prompt` was supplied by the user rather than built.
    pub custom_prompt: bool,
    pub status_id: StatusId,
    pub total_cost: f64,
    /// Last sign of life from the worker running this project.
    pub heartbeat_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    pub fn status(&self) -> Result<ProjectStatus, CoreError> {
        ProjectStatus::from_id(self.status_id)
    }

    pub fn scene(&self) -> Result<SceneType, CoreError> {
        SceneType::parse(&self.scene_type)
    }

    pub fn pose(&self) -> Result<PoseStyle, CoreError> {
        PoseStyle::parse(&self.pose_style)
    }

    pub fn style(&self) -> StyleContext {
        StyleContext {
            reference_url: self.style_reference_url.clone(),
            palette: self.style_palette.clone(),
        }
    }
}

/// DTO for inserting a project. Validation happens before this is built.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub background_url: String,
    pub mask_url: Option<String>,
    pub pose_reference_url: String,
    pub scene_type: SceneType,
    pub pose_style: PoseStyle,
    pub variant_count: i16,
    pub controlnet_strength: f64,
    pub guidance_scale: f64,
    pub style: StyleContext,
    pub prompt: String,
    pub custom_prompt: bool,
}

/// DTO for updating a project. Only `Some` fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProject {
    pub status: Option<ProjectStatus>,
    pub total_cost: Option<f64>,
    pub prompt: Option<String>,
    pub mask_url: Option<String>,
}
