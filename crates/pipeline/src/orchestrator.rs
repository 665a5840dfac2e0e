//! Per-project generation runs.
//!
//! [`VariantOrchestrator::run_project`] first aligns a project that has no
//! alignment yet, so generation is always conditioned on scene-adapted
//! keypoints and a mask. It then walks the variants in `variant_number`
//! order, one at a time:
//!
//! 1. claim the variant (`pending -> generating`, compare-and-set)
//! 2. generate with the project's settings and the variant's seed
//! 3. detect issues; when there are any, arbitrate corrections
//! 4. score the final image and complete the variant
//!
//! A failure in steps 2-4 fails only that variant. Storage failures abort
//! the run. An alignment that fails fails every remaining variant. Once
//! every variant is terminal the project's metrics are aggregated and the
//! project is completed.
//!
//! While a run is active its project's lease is renewed in the background,
//! so recovery after a crash leaves live runs alone.

use std::sync::Arc;

use posecraft_backends::timeout::with_timeout;
use posecraft_backends::{GenerationBackend, GenerationRequest, QualityScorer, ScoreRequest};
use posecraft_core::correction::ORIGINAL_METHOD;
use posecraft_core::error::{CoreError, GeometryError};
use posecraft_core::issues::{DetectionRequest, IssueDetector};
use posecraft_core::metrics::{MetricsAggregator, QualityMetrics};
use posecraft_core::pose::PoseKeypoint;
use posecraft_core::project::total_cost;
use posecraft_core::status::{ProjectStatus, VariantStatus};
use posecraft_core::types::DbId;
use posecraft_db::models::project::{Project, UpdateProject};
use posecraft_db::models::variant::{CompleteVariant, Variant};
use posecraft_db::Store;
use posecraft_events::bus::{
    PipelineEvent, PROJECT_CANCELLED, PROJECT_COMPLETED, VARIANT_COMPLETED, VARIANT_FAILED, VARIANT_STARTED,
};
use posecraft_events::EventBus;
use serde_json::json;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::alignment::ProjectAligner;
use crate::arbiter::{ArbitrationRequest, CorrectionArbiter};
use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Error message recorded on variants skipped by a cancelled run.
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// How a call to [`VariantOrchestrator::run_project`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every variant is terminal and the project is closed out.
    Completed,
    /// The project had been cancelled before this call.
    Cancelled,
    /// The token fired before all variants were dispatched. The project is
    /// left `generating`.
    Interrupted { remaining: usize },
}

/// Remote collaborators used for each variant.
pub struct PipelineBackends {
    pub aligner: Arc<ProjectAligner>,
    pub generator: Arc<dyn GenerationBackend>,
    pub detector: Arc<dyn IssueDetector>,
    pub arbiter: Arc<CorrectionArbiter>,
    pub scorer: Arc<dyn QualityScorer>,
}

pub struct VariantOrchestrator {
    store: Arc<dyn Store>,
    backends: PipelineBackends,
    events: Arc<EventBus>,
    aggregator: MetricsAggregator,
    config: PipelineConfig,
}

/// Final fields of a variant that made it through the pipeline.
struct Finished {
    completion: CompleteVariant,
    issue_count: usize,
}

impl VariantOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        backends: PipelineBackends,
        events: Arc<EventBus>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            backends,
            events,
            aggregator: MetricsAggregator::default(),
            config,
        }
    }

    pub fn with_aggregator(mut self, aggregator: MetricsAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Run every non-terminal variant of a project, then close it out.
    ///
    /// Terminal variants are never dispatched again, so calling this again
    /// after an interruption resumes where the last call stopped. Checks
    /// `cancel` only between variants; the variant in flight always
    /// finishes.
    pub async fn run_project(&self, project_id: DbId, cancel: &CancellationToken) -> Result<RunOutcome, PipelineError> {
        let project = self.store.find_project(project_id).await?;
        match project.status()? {
            ProjectStatus::Completed => {
                tracing::info!(project_id, "Project already completed, nothing to run");
                return Ok(RunOutcome::Completed);
            }
            ProjectStatus::Cancelled => return Ok(RunOutcome::Cancelled),
            ProjectStatus::Pending => {
                self.set_status(project_id, ProjectStatus::Generating).await?;
            }
            ProjectStatus::Generating => {}
        }

        self.store.touch_project(project_id).await?;
        let _lease = self.hold_lease(project_id);

        let latest = self.store.find_latest_alignment(project_id).await?;
        let alignment = match latest {
            Some(stored) if project.mask_url.is_some() => stored,
            _ => {
                let aligned = with_timeout(
                    "alignment",
                    self.config.alignment_timeout,
                    self.backends.aligner.align(&project),
                )
                .await;
                match aligned {
                    Ok(stored) => stored,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => return self.fail_unaligned(project_id, &e).await,
                }
            }
        };
        // Alignment may have set the mask and refreshed the prompt.
        let project = self.store.find_project(project_id).await?;
        let keypoints = alignment.alignment.0.adapted_keypoints();

        let variants = self.store.list_variants(project_id).await?;
        let todo: Vec<&Variant> = variants
            .iter()
            .filter(|v| v.status().map(|s| !s.is_terminal()).unwrap_or(false))
            .collect();
        tracing::info!(
            project_id,
            total = variants.len(),
            to_run = todo.len(),
            validation_score = alignment.validation_score,
            "Starting project run",
        );

        for (i, variant) in todo.iter().enumerate() {
            if i > 0 && !self.config.inter_variant_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.inter_variant_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                let remaining = todo.len() - i;
                tracing::info!(project_id, remaining, "Project run interrupted");
                return Ok(RunOutcome::Interrupted { remaining });
            }
            self.run_variant(&project, variant, &keypoints).await?;
        }

        self.close_out(project_id).await
    }

    /// Mark every remaining `pending` variant failed, aggregate what exists
    /// and end the project `cancelled`.
    ///
    /// Variants still `generating` are left alone; cancellation never
    /// preempts a variant in flight.
    pub async fn finalize_cancelled(&self, project_id: DbId) -> Result<QualityMetrics, PipelineError> {
        for variant in self.store.list_variants(project_id).await? {
            if variant.status()? == VariantStatus::Pending {
                self.store.fail_variant(variant.id, CANCELLED_MESSAGE).await?;
            }
        }

        let variants = self.store.list_variants(project_id).await?;
        let metrics = self.save_metrics(project_id, &variants).await?;
        let dispatched = variants
            .iter()
            .filter(|v| v.error_message.as_deref() != Some(CANCELLED_MESSAGE))
            .count() as u32;
        self.store
            .update_project(
                project_id,
                &UpdateProject {
                    status: Some(ProjectStatus::Cancelled),
                    total_cost: Some(total_cost(dispatched, self.config.per_variant_cost)),
                    ..Default::default()
                },
            )
            .await?;

        self.events.publish(
            PipelineEvent::new(PROJECT_CANCELLED, project_id)
                .with_payload(json!({ "completed": metrics.completed_count, "dispatched": dispatched })),
        );
        tracing::info!(project_id, dispatched, "Project cancelled");
        Ok(metrics)
    }

    // -----------------------------------------------------------------------
    // Variants
    // -----------------------------------------------------------------------

    async fn run_variant(
        &self,
        project: &Project,
        variant: &Variant,
        keypoints: &[PoseKeypoint],
    ) -> Result<(), PipelineError> {
        if !self.store.start_variant(variant.id).await? {
            tracing::warn!(
                project_id = project.id,
                variant_id = variant.id,
                "Variant is no longer pending, skipping",
            );
            return Ok(());
        }
        self.events.publish(
            PipelineEvent::new(VARIANT_STARTED, project.id)
                .with_variant(variant.id)
                .with_payload(json!({ "variant_number": variant.variant_number, "seed": variant.seed })),
        );

        match self.process(project, variant, keypoints).await {
            Ok(finished) => {
                let stored = self.store.complete_variant(variant.id, &finished.completion).await?;
                tracing::info!(
                    project_id = project.id,
                    variant_id = variant.id,
                    variant_number = variant.variant_number,
                    method = %finished.completion.correction_method,
                    issue_count = finished.issue_count,
                    "Variant completed",
                );
                self.events.publish(
                    PipelineEvent::new(VARIANT_COMPLETED, project.id)
                        .with_variant(variant.id)
                        .with_payload(json!({
                            "variant_number": variant.variant_number,
                            "image_url": stored.image_url,
                            "correction_method": stored.correction_method,
                            "issue_count": finished.issue_count,
                        })),
                );
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(
                    project_id = project.id,
                    variant_id = variant.id,
                    variant_number = variant.variant_number,
                    error = %message,
                    "Variant failed",
                );
                self.store.fail_variant(variant.id, &message).await?;
                self.events.publish(
                    PipelineEvent::new(VARIANT_FAILED, project.id)
                        .with_variant(variant.id)
                        .with_payload(json!({ "variant_number": variant.variant_number, "error": message })),
                );
            }
        }
        Ok(())
    }

    /// Generation, detection, correction and scoring for one variant.
    async fn process(
        &self,
        project: &Project,
        variant: &Variant,
        keypoints: &[PoseKeypoint],
    ) -> Result<Finished, PipelineError> {
        let style = project.style();
        let mask_url = project
            .mask_url
            .clone()
            .ok_or(CoreError::Geometry(GeometryError::MissingReference("mask")))?;

        let request = GenerationRequest {
            background_url: project.background_url.clone(),
            mask_url: mask_url.clone(),
            pose_reference_url: project.pose_reference_url.clone(),
            prompt: project.prompt.clone(),
            controlnet_strength: project.controlnet_strength,
            guidance_scale: project.guidance_scale,
            seed: variant.seed,
            keypoints: keypoints.to_vec(),
        };
        let generated = with_timeout(
            "generation",
            self.config.generation_timeout,
            self.backends.generator.generate(&request),
        )
        .await?;

        let detection = DetectionRequest {
            generated_url: generated.image_url.clone(),
            background_url: project.background_url.clone(),
            mask_url: mask_url.clone(),
            style: style.clone(),
        };
        let issues = with_timeout(
            "issue detection",
            self.config.detection_timeout,
            self.backends.detector.detect(&detection),
        )
        .await?;

        let (image_url, correction_method, correction_score) = if issues.is_empty() {
            (generated.image_url.clone(), ORIGINAL_METHOD.to_string(), 0.0)
        } else {
            let comparison = self
                .backends
                .arbiter
                .arbitrate(&ArbitrationRequest {
                    background_url: project.background_url.clone(),
                    generated_url: generated.image_url.clone(),
                    mask_url: mask_url.clone(),
                    style_reference_url: style.reference_url.clone(),
                    issues: issues.clone(),
                })
                .await?;
            let best = comparison.best().ok_or_else(|| {
                CoreError::Internal(format!(
                    "winning method '{}' missing from comparison",
                    comparison.best_method
                ))
            })?;
            (best.image_url.clone(), best.method.clone(), best.correction_score)
        };

        let scores = with_timeout(
            "scoring",
            self.config.scoring_timeout,
            self.backends.scorer.score(&ScoreRequest {
                original_url: project.background_url.clone(),
                generated_url: image_url.clone(),
                mask_url,
                style_reference_url: style.reference_url.clone(),
            }),
        )
        .await?;

        Ok(Finished {
            completion: CompleteVariant {
                image_url,
                generation_time_secs: generated.generation_time_secs,
                backend_request_id: Some(generated.backend_request_id),
                scores,
                correction_method,
                correction_score,
            },
            issue_count: issues.len(),
        })
    }

    /// Fail every unfinished variant with the alignment error and close
    /// the project out.
    async fn fail_unaligned(&self, project_id: DbId, error: &PipelineError) -> Result<RunOutcome, PipelineError> {
        let message = format!("alignment failed: {error}");
        tracing::warn!(project_id, error = %error, "Alignment failed, failing remaining variants");
        for variant in self.store.list_variants(project_id).await? {
            if variant.status()?.is_terminal() {
                continue;
            }
            self.store.fail_variant(variant.id, &message).await?;
            self.events.publish(
                PipelineEvent::new(VARIANT_FAILED, project_id)
                    .with_variant(variant.id)
                    .with_payload(json!({ "variant_number": variant.variant_number, "error": message })),
            );
        }
        self.close_out(project_id).await
    }

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// Renew the project's lease until the returned guard is dropped.
    fn hold_lease(&self, project_id: DbId) -> DropGuard {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let store = Arc::clone(&self.store);
        let period = self.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; the run just touched.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = store.touch_project(project_id).await {
                            tracing::warn!(project_id, error = %e, "Failed to renew run lease");
                        }
                    }
                }
            }
        });
        stop.drop_guard()
    }

    // -----------------------------------------------------------------------
    // Close-out
    // -----------------------------------------------------------------------

    async fn close_out(&self, project_id: DbId) -> Result<RunOutcome, PipelineError> {
        let variants = self.store.list_variants(project_id).await?;
        let unfinished = variants
            .iter()
            .filter(|v| v.status().map(|s| !s.is_terminal()).unwrap_or(true))
            .count();
        if unfinished > 0 {
            tracing::warn!(project_id, unfinished, "Variants still running elsewhere, not closing project");
            return Ok(RunOutcome::Interrupted { remaining: unfinished });
        }

        let metrics = self.save_metrics(project_id, &variants).await?;
        let count = variants.len() as u32;
        self.store
            .update_project(
                project_id,
                &UpdateProject {
                    status: Some(ProjectStatus::Completed),
                    total_cost: Some(total_cost(count, self.config.per_variant_cost)),
                    ..Default::default()
                },
            )
            .await?;

        self.events.publish(PipelineEvent::new(PROJECT_COMPLETED, project_id).with_payload(json!({
            "completed": metrics.completed_count,
            "total": metrics.total_count,
            "success_rate": metrics.success_rate,
        })));
        tracing::info!(
            project_id,
            completed = metrics.completed_count,
            total = metrics.total_count,
            "Project completed",
        );
        Ok(RunOutcome::Completed)
    }

    async fn save_metrics(&self, project_id: DbId, variants: &[Variant]) -> Result<QualityMetrics, PipelineError> {
        let summaries = variants
            .iter()
            .map(Variant::summary)
            .collect::<Result<Vec<_>, _>>()?;
        let metrics = self.aggregator.aggregate(project_id, &summaries);
        self.store.save_quality_metrics(&metrics).await?;
        Ok(metrics)
    }

    async fn set_status(&self, project_id: DbId, status: ProjectStatus) -> Result<Project, PipelineError> {
        Ok(self
            .store
            .update_project(
                project_id,
                &UpdateProject {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await?)
    }
}
