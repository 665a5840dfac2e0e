//! Project creation rules: validation, seeds, and cost.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::scene::{PoseStyle, SceneType};
use crate::style::{parse_palette, StyleContext};

pub const MIN_VARIANT_COUNT: u32 = 1;
pub const MAX_VARIANT_COUNT: u32 = 5;

pub const DEFAULT_CONTROLNET_STRENGTH: f64 = 1.0;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;
pub const MAX_CONTROLNET_STRENGTH: f64 = 2.0;
pub const MAX_GUIDANCE_SCALE: f64 = 30.0;

/// Seeds assigned by variant number when a project does not supply its own.
pub const DEFAULT_SEEDS: [i64; MAX_VARIANT_COUNT as usize] = [42, 1337, 2024, 7777, 9001];

/// Request to create a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub background_url: String,
    /// Inpainting mask. Derived from the aligned pose when omitted.
    #[serde(default)]
    pub mask_url: Option<String>,
    pub pose_reference_url: String,
    pub scene_type: SceneType,
    pub pose_style: PoseStyle,
    pub variant_count: u32,
    pub controlnet_strength: f64,
    pub guidance_scale: f64,
    /// Explicit per-variant seeds, one per variant, in variant order.
    #[serde(default)]
    pub seeds: Option<Vec<i64>>,
    #[serde(default)]
    pub style: StyleContext,
    /// Replaces the built prompt when set.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl NewProject {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("Project name must not be empty".into()));
        }
        validate_variant_count(self.variant_count)?;
        for (field, value) in [
            ("background_url", Some(&self.background_url)),
            ("mask_url", self.mask_url.as_ref()),
            ("pose_reference_url", Some(&self.pose_reference_url)),
        ] {
            if value.is_some_and(|v| v.trim().is_empty()) {
                return Err(CoreError::Validation(format!("{field} must not be empty")));
            }
        }
        if !(0.0..=MAX_CONTROLNET_STRENGTH).contains(&self.controlnet_strength) {
            return Err(CoreError::Validation(format!(
                "controlnet_strength must be in [0, {MAX_CONTROLNET_STRENGTH}], got {}",
                self.controlnet_strength
            )));
        }
        if !(self.guidance_scale > 0.0 && self.guidance_scale <= MAX_GUIDANCE_SCALE) {
            return Err(CoreError::Validation(format!(
                "guidance_scale must be in (0, {MAX_GUIDANCE_SCALE}], got {}",
                self.guidance_scale
            )));
        }
        if let Some(seeds) = &self.seeds {
            if seeds.len() != self.variant_count as usize {
                return Err(CoreError::Validation(format!(
                    "Expected {} seeds, got {}",
                    self.variant_count,
                    seeds.len()
                )));
            }
            if let Some(bad) = seeds.iter().find(|s| **s < 0) {
                return Err(CoreError::Validation(format!("Seeds must be non-negative, got {bad}")));
            }
        }
        if let Some(prompt) = &self.prompt {
            if prompt.trim().is_empty() {
                return Err(CoreError::Validation("Prompt override must not be empty".into()));
            }
        }
        parse_palette(&self.style.palette)?;
        Ok(())
    }

    /// Seeds in variant order: explicit seeds, or the default table.
    pub fn resolved_seeds(&self) -> Vec<i64> {
        match &self.seeds {
            Some(seeds) => seeds.clone(),
            None => (1..=self.variant_count).map(default_seed).collect(),
        }
    }
}

pub fn validate_variant_count(count: u32) -> Result<(), CoreError> {
    if (MIN_VARIANT_COUNT..=MAX_VARIANT_COUNT).contains(&count) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "variant_count must be between {MIN_VARIANT_COUNT} and {MAX_VARIANT_COUNT}, got {count}"
        )))
    }
}

/// Default seed for a 1-based variant number. Numbers past the table wrap.
pub fn default_seed(variant_number: u32) -> i64 {
    let idx = (variant_number.max(1) - 1) as usize % DEFAULT_SEEDS.len();
    DEFAULT_SEEDS[idx]
}

pub fn total_cost(variant_count: u32, per_variant_cost: f64) -> f64 {
    f64::from(variant_count) * per_variant_cost
}
