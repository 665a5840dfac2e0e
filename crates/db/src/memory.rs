//! In-process [`Store`] used when no database is configured and in tests.
//!
//! All state sits behind one `RwLock`, so every operation is atomic.
//! Alignments are kept as serialized JSON, the same shape the JSONB column
//! holds, so reads go through the same decode path as the database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use posecraft_core::alignment::PoseAlignment;
use posecraft_core::metrics::QualityMetrics;
use posecraft_core::status::{ProjectStatus, VariantStatus};
use posecraft_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::alignment::StoredAlignment;
use crate::models::project::{CreateProject, Project, UpdateProject};
use crate::models::quality_metrics::QualityMetricsRecord;
use crate::models::variant::{CompleteVariant, CreateVariant, Variant};
use crate::store::{check_transition, InterruptedReset, Store};

struct AlignmentEntry {
    id: DbId,
    project_id: DbId,
    json: String,
    validation_score: f64,
    created_at: Timestamp,
}

#[derive(Default)]
struct State {
    last_id: DbId,
    projects: BTreeMap<DbId, Project>,
    variants: BTreeMap<DbId, Variant>,
    /// Keyed by project id.
    metrics: BTreeMap<DbId, QualityMetricsRecord>,
    alignments: Vec<AlignmentEntry>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.last_id += 1;
        self.last_id
    }

    fn project(&self, id: DbId) -> Result<&Project, StoreError> {
        self.projects
            .get(&id)
            .ok_or(StoreError::NotFound { entity: "project", id })
    }

    fn variant_mut(&mut self, id: DbId) -> Result<&mut Variant, StoreError> {
        self.variants
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "variant", id })
    }

    fn insert_project(&mut self, input: &CreateProject) -> Project {
        let now = Utc::now();
        let project = Project {
            id: self.next_id(),
            name: input.name.clone(),
            background_url: input.background_url.clone(),
            mask_url: input.mask_url.clone(),
            pose_reference_url: input.pose_reference_url.clone(),
            scene_type: input.scene_type.as_str().to_string(),
            pose_style: input.pose_style.as_str().to_string(),
            variant_count: input.variant_count,
            controlnet_strength: input.controlnet_strength,
            guidance_scale: input.guidance_scale,
            style_reference_url: input.style.reference_url.clone(),
            style_palette: input.style.palette.clone(),
            prompt: input.prompt.clone(),
            custom_prompt: input.custom_prompt,
            status_id: ProjectStatus::Pending.id(),
            total_cost: 0.0,
            heartbeat_at: None,
            created_at: now,
            updated_at: now,
        };
        self.projects.insert(project.id, project.clone());
        project
    }

    /// Reject variant numbers already used by the project or repeated in
    /// `inputs`, the way the unique index does.
    fn check_variant_numbers(&self, project_id: DbId, inputs: &[CreateVariant]) -> Result<(), StoreError> {
        for (i, input) in inputs.iter().enumerate() {
            let stored = self
                .variants
                .values()
                .any(|v| v.project_id == project_id && v.variant_number == input.variant_number);
            let repeated = inputs[..i].iter().any(|o| o.variant_number == input.variant_number);
            if stored || repeated {
                return Err(StoreError::Conflict(format!(
                    "variant {} already exists for project {project_id}",
                    input.variant_number
                )));
            }
        }
        Ok(())
    }

    fn insert_variants(&mut self, project_id: DbId, inputs: &[CreateVariant]) -> Vec<Variant> {
        let now = Utc::now();
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            let variant = Variant {
                id: self.next_id(),
                project_id,
                variant_number: input.variant_number,
                seed: input.seed,
                status_id: VariantStatus::Pending.id(),
                image_url: None,
                generation_time_secs: None,
                backend_request_id: None,
                ssim: None,
                pose_accuracy: None,
                color_delta: None,
                style_consistency: None,
                correction_method: None,
                correction_score: None,
                error_message: None,
                created_at: now,
                updated_at: now,
            };
            self.variants.insert(variant.id, variant.clone());
            created.push(variant);
        }
        created.sort_by_key(|v| v.variant_number);
        created
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_project(&self, input: &CreateProject) -> Result<Project, StoreError> {
        Ok(self.state.write().await.insert_project(input))
    }

    async fn create_project_with_variants(
        &self,
        input: &CreateProject,
        variants: &[CreateVariant],
    ) -> Result<(Project, Vec<Variant>), StoreError> {
        let mut state = self.state.write().await;
        // A fresh project has no variants yet, so id 0 never collides.
        state.check_variant_numbers(0, variants)?;
        let project = state.insert_project(input);
        let created = state.insert_variants(project.id, variants);
        Ok((project, created))
    }

    async fn find_project(&self, id: DbId) -> Result<Project, StoreError> {
        self.state.read().await.project(id).cloned()
    }

    async fn update_project(&self, id: DbId, input: &UpdateProject) -> Result<Project, StoreError> {
        let mut state = self.state.write().await;
        let project = state
            .projects
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "project", id })?;
        if let Some(status) = input.status {
            project.status_id = status.id();
        }
        if let Some(cost) = input.total_cost {
            project.total_cost = cost;
        }
        if let Some(prompt) = &input.prompt {
            project.prompt = prompt.clone();
        }
        if let Some(mask_url) = &input.mask_url {
            project.mask_url = Some(mask_url.clone());
        }
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn claim_next_pending_project(&self) -> Result<Option<Project>, StoreError> {
        let mut state = self.state.write().await;
        let next = state
            .projects
            .values_mut()
            .filter(|p| p.status_id == ProjectStatus::Pending.id())
            .min_by_key(|p| (p.created_at, p.id));
        Ok(next.map(|project| {
            let now = Utc::now();
            project.status_id = ProjectStatus::Generating.id();
            project.heartbeat_at = Some(now);
            project.updated_at = now;
            project.clone()
        }))
    }

    async fn touch_project(&self, id: DbId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let project = state
            .projects
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "project", id })?;
        project.heartbeat_at = Some(Utc::now());
        Ok(())
    }

    async fn create_variants(&self, project_id: DbId, inputs: &[CreateVariant]) -> Result<Vec<Variant>, StoreError> {
        let mut state = self.state.write().await;
        state.project(project_id)?;
        state.check_variant_numbers(project_id, inputs)?;
        Ok(state.insert_variants(project_id, inputs))
    }

    async fn list_variants(&self, project_id: DbId) -> Result<Vec<Variant>, StoreError> {
        let state = self.state.read().await;
        let mut variants: Vec<Variant> = state
            .variants
            .values()
            .filter(|v| v.project_id == project_id)
            .cloned()
            .collect();
        variants.sort_by_key(|v| v.variant_number);
        Ok(variants)
    }

    async fn find_variant(&self, id: DbId) -> Result<Variant, StoreError> {
        self.state
            .read()
            .await
            .variants
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "variant", id })
    }

    async fn start_variant(&self, id: DbId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let variant = state.variant_mut(id)?;
        if variant.status_id != VariantStatus::Pending.id() {
            return Ok(false);
        }
        variant.status_id = VariantStatus::Generating.id();
        variant.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_variant(&self, id: DbId, input: &CompleteVariant) -> Result<Variant, StoreError> {
        let mut state = self.state.write().await;
        let variant = state.variant_mut(id)?;
        check_transition(variant, VariantStatus::Completed)?;
        variant.status_id = VariantStatus::Completed.id();
        variant.image_url = Some(input.image_url.clone());
        variant.generation_time_secs = Some(input.generation_time_secs);
        variant.backend_request_id = input.backend_request_id.clone();
        variant.ssim = Some(input.scores.ssim);
        variant.pose_accuracy = Some(input.scores.pose_accuracy);
        variant.color_delta = Some(input.scores.color_delta);
        variant.style_consistency = input.scores.style_consistency;
        variant.correction_method = Some(input.correction_method.clone());
        variant.correction_score = Some(input.correction_score);
        variant.error_message = None;
        variant.updated_at = Utc::now();
        Ok(variant.clone())
    }

    async fn fail_variant(&self, id: DbId, error_message: &str) -> Result<Variant, StoreError> {
        let mut state = self.state.write().await;
        let variant = state.variant_mut(id)?;
        check_transition(variant, VariantStatus::Failed)?;
        variant.status_id = VariantStatus::Failed.id();
        variant.error_message = Some(error_message.to_string());
        variant.correction_method = None;
        variant.correction_score = None;
        variant.updated_at = Utc::now();
        Ok(variant.clone())
    }

    async fn save_quality_metrics(&self, metrics: &QualityMetrics) -> Result<QualityMetricsRecord, StoreError> {
        let mut state = self.state.write().await;
        state.project(metrics.project_id)?;
        let now = Utc::now();
        let existing = state
            .metrics
            .get(&metrics.project_id)
            .map(|m| (m.id, m.created_at));
        let (id, created_at) = match existing {
            Some(kept) => kept,
            None => (state.next_id(), now),
        };
        let record = QualityMetricsRecord {
            id,
            project_id: metrics.project_id,
            avg_generation_time: metrics.avg_generation_time,
            avg_ssim: metrics.avg_ssim,
            avg_pose_accuracy: metrics.avg_pose_accuracy,
            avg_color_delta: metrics.avg_color_delta,
            avg_style_consistency: metrics.avg_style_consistency,
            success_rate: metrics.success_rate,
            completed_count: metrics.completed_count as i32,
            total_count: metrics.total_count as i32,
            method_effectiveness: Json(metrics.method_effectiveness.clone()),
            recommendations: metrics.recommendations.clone(),
            created_at,
            updated_at: now,
        };
        state.metrics.insert(metrics.project_id, record.clone());
        Ok(record)
    }

    async fn find_quality_metrics(&self, project_id: DbId) -> Result<Option<QualityMetricsRecord>, StoreError> {
        Ok(self.state.read().await.metrics.get(&project_id).cloned())
    }

    async fn save_alignment(&self, project_id: DbId, alignment: &PoseAlignment) -> Result<StoredAlignment, StoreError> {
        let json = serde_json::to_string(alignment)?;
        let mut state = self.state.write().await;
        state.project(project_id)?;
        let entry = AlignmentEntry {
            id: state.next_id(),
            project_id,
            json,
            validation_score: alignment.validation_score,
            created_at: Utc::now(),
        };
        let stored = decode_alignment(&entry)?;
        state.alignments.push(entry);
        Ok(stored)
    }

    async fn find_latest_alignment(&self, project_id: DbId) -> Result<Option<StoredAlignment>, StoreError> {
        let state = self.state.read().await;
        state
            .alignments
            .iter()
            .filter(|a| a.project_id == project_id)
            .max_by_key(|a| a.id)
            .map(decode_alignment)
            .transpose()
    }

    async fn reset_interrupted(&self, stale_before: Timestamp) -> Result<InterruptedReset, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut reset_ids = Vec::new();
        for project in state.projects.values_mut() {
            let stale = project.heartbeat_at.map_or(true, |at| at < stale_before);
            if project.status_id == ProjectStatus::Generating.id() && stale {
                project.status_id = ProjectStatus::Pending.id();
                project.heartbeat_at = None;
                project.updated_at = now;
                reset_ids.push(project.id);
            }
        }

        let mut reset = InterruptedReset {
            projects: reset_ids.len() as u64,
            variants: 0,
        };
        for variant in state.variants.values_mut() {
            if variant.status_id == VariantStatus::Generating.id() && reset_ids.contains(&variant.project_id) {
                variant.status_id = VariantStatus::Pending.id();
                variant.updated_at = now;
                reset.variants += 1;
            }
        }
        Ok(reset)
    }
}

fn decode_alignment(entry: &AlignmentEntry) -> Result<StoredAlignment, StoreError> {
    Ok(StoredAlignment {
        id: entry.id,
        project_id: entry.project_id,
        alignment: Json(serde_json::from_str(&entry.json)?),
        validation_score: entry.validation_score,
        created_at: entry.created_at,
    })
}
