//! Project creation and pose alignment.

use std::sync::Arc;

use posecraft_core::project::NewProject;
use posecraft_core::prompt::{build_prompt, LightingAnalysis};
use posecraft_core::types::DbId;
use posecraft_db::models::alignment::StoredAlignment;
use posecraft_db::models::project::{CreateProject, Project};
use posecraft_db::models::variant::{CreateVariant, Variant};
use posecraft_db::Store;

use crate::alignment::ProjectAligner;
use crate::error::PipelineError;

pub struct ProjectService {
    store: Arc<dyn Store>,
    aligner: Arc<ProjectAligner>,
}

impl ProjectService {
    pub fn new(store: Arc<dyn Store>, aligner: Arc<ProjectAligner>) -> Self {
        Self { store, aligner }
    }

    /// Validate and persist a project with its variants, all `pending`, in
    /// one write. Nothing is stored when any part is rejected.
    ///
    /// Without a prompt override the prompt is built from the scene and
    /// palette under neutral lighting; [`align_project`](Self::align_project)
    /// refines it from the background.
    pub async fn create_project(&self, input: NewProject) -> Result<(Project, Vec<Variant>), PipelineError> {
        input.validate()?;

        let custom_prompt = input.prompt.is_some();
        let prompt = match &input.prompt {
            Some(prompt) => prompt.trim().to_string(),
            None => build_prompt(input.scene_type, &LightingAnalysis::default(), &input.style.palette),
        };
        let seeds = input.resolved_seeds();
        let variants: Vec<CreateVariant> = seeds
            .iter()
            .enumerate()
            .map(|(i, seed)| CreateVariant {
                variant_number: i as i16 + 1,
                seed: *seed,
            })
            .collect();

        let project = CreateProject {
            name: input.name.trim().to_string(),
            background_url: input.background_url,
            mask_url: input.mask_url,
            pose_reference_url: input.pose_reference_url,
            scene_type: input.scene_type,
            pose_style: input.pose_style,
            variant_count: seeds.len() as i16,
            controlnet_strength: input.controlnet_strength,
            guidance_scale: input.guidance_scale,
            style: input.style,
            prompt,
            custom_prompt,
        };
        let (project, variants) = self.store.create_project_with_variants(&project, &variants).await?;

        tracing::info!(
            project_id = project.id,
            variant_count = variants.len(),
            scene_type = %project.scene_type,
            "Project created",
        );
        Ok((project, variants))
    }

    /// Align the project's pose reference to its background.
    /// See [`ProjectAligner::align`].
    pub async fn align_project(&self, project_id: DbId) -> Result<StoredAlignment, PipelineError> {
        let project = self.store.find_project(project_id).await?;
        self.aligner.align(&project).await
    }
}
