//! Scene alignment of a stored project.
//!
//! Aligning places the pose reference into the background's most stable
//! insertion zone and records the result. Two project fields follow from
//! the same background read: a built prompt is refreshed with the
//! background's lighting, and a project without a mask gets one drawn
//! from the adapted keypoints.

use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use posecraft_backends::ImageLoader;
use posecraft_core::alignment::SceneAligner;
use posecraft_core::error::CoreError;
use posecraft_core::mask::{self, MaskOptions};
use posecraft_core::pose::PoseKeypoint;
use posecraft_core::prompt::{analyze_lighting, build_prompt};
use posecraft_core::types::DbId;
use posecraft_db::models::alignment::StoredAlignment;
use posecraft_db::models::project::{Project, UpdateProject};
use posecraft_db::Store;

use crate::error::PipelineError;

pub struct ProjectAligner {
    store: Arc<dyn Store>,
    aligner: SceneAligner,
    loader: Arc<dyn ImageLoader>,
    mask_dir: PathBuf,
    mask_options: MaskOptions,
}

impl ProjectAligner {
    /// * `mask_dir` - Where derived masks are written. Created on first use.
    pub fn new(
        store: Arc<dyn Store>,
        aligner: SceneAligner,
        loader: Arc<dyn ImageLoader>,
        mask_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            aligner,
            loader,
            mask_dir: mask_dir.into(),
            mask_options: MaskOptions::default(),
        }
    }

    pub fn with_mask_options(mut self, options: MaskOptions) -> Self {
        self.mask_options = options;
        self
    }

    /// Align `project` and store the alignment, superseding earlier ones.
    ///
    /// Geometry errors surface unchanged and store nothing. When the
    /// project has no mask the background must be readable; otherwise an
    /// unreadable background only skips the prompt refresh.
    pub async fn align(&self, project: &Project) -> Result<StoredAlignment, PipelineError> {
        let scene = project.scene()?;
        let alignment = self
            .aligner
            .align(
                Some(project.background_url.as_str()),
                Some(project.pose_reference_url.as_str()),
                scene,
                project.pose()?,
            )
            .await?;

        let needs_mask = project.mask_url.is_none();
        let background = if needs_mask || !project.custom_prompt {
            match self.loader.load(&project.background_url).await {
                Ok(background) => Some(background),
                Err(e) if needs_mask => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(
                        project_id = project.id,
                        error = %e,
                        "Could not analyse background lighting, keeping prompt",
                    );
                    None
                }
            }
        } else {
            None
        };

        let mut update = UpdateProject::default();
        if let Some(background) = &background {
            if needs_mask {
                let keypoints = alignment.adapted_keypoints();
                update.mask_url = Some(self.write_mask(project.id, &keypoints, background).await?);
            }
            if !project.custom_prompt {
                let lighting = analyze_lighting(&background.to_rgb8());
                let prompt = build_prompt(scene, &lighting, &project.style_palette);
                if prompt != project.prompt {
                    update.prompt = Some(prompt);
                }
            }
        }

        let stored = self.store.save_alignment(project.id, &alignment).await?;
        if update.mask_url.is_some() || update.prompt.is_some() {
            self.store.update_project(project.id, &update).await?;
        }
        tracing::info!(
            project_id = project.id,
            validation_score = alignment.validation_score,
            zone_start = alignment.insertion_zone.x_start,
            zone_end = alignment.insertion_zone.x_end,
            mask_derived = update.mask_url.is_some(),
            "Pose aligned",
        );
        Ok(stored)
    }

    /// Draw the mask at the background's size and return its `file://` URL.
    async fn write_mask(
        &self,
        project_id: DbId,
        keypoints: &[PoseKeypoint],
        background: &DynamicImage,
    ) -> Result<String, PipelineError> {
        let drawn = mask::synthesize(keypoints, background.width(), background.height(), self.mask_options);
        let png = mask::encode_png(&drawn)?;

        let io_error =
            |e: std::io::Error| CoreError::Internal(format!("Failed to write mask to {}: {e}", self.mask_dir.display()));
        tokio::fs::create_dir_all(&self.mask_dir).await.map_err(io_error)?;
        let dir = tokio::fs::canonicalize(&self.mask_dir).await.map_err(io_error)?;
        let path = dir.join(format!("project-{project_id}-mask.png"));
        tokio::fs::write(&path, png).await.map_err(io_error)?;

        tracing::debug!(project_id, path = %path.display(), "Mask derived from aligned pose");
        Ok(format!("file://{}", path.display()))
    }
}
