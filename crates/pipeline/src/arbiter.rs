//! Concurrent correction arbitration.
//!
//! Every registered strategy corrects the generated image at the same time
//! as the baseline is scored. A strategy that fails or times out is
//! degraded to the baseline's scores, so it can tie the baseline but never
//! beat it; the comparison itself only fails when the baseline cannot be
//! scored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use posecraft_backends::timeout::with_timeout;
use posecraft_backends::{BackendError, CorrectionBackend, CorrectionRequest, QualityScorer, ScoreRequest};
use posecraft_core::correction::{
    correction_score, issues_addressed, CorrectionComparison, CorrectionResult, EffectivenessTable, ORIGINAL_METHOD,
};
use posecraft_core::error::CoreError;
use posecraft_core::issues::DetectedIssue;
use posecraft_core::metrics::overall_quality;

use crate::error::PipelineError;

/// Inputs for one arbitration round.
#[derive(Debug, Clone)]
pub struct ArbitrationRequest {
    pub background_url: String,
    pub generated_url: String,
    pub mask_url: String,
    pub style_reference_url: Option<String>,
    pub issues: Vec<DetectedIssue>,
}

pub struct CorrectionArbiter {
    /// In priority order; earlier strategies win ties.
    strategies: Vec<Arc<dyn CorrectionBackend>>,
    scorer: Arc<dyn QualityScorer>,
    table: EffectivenessTable,
    correction_timeout: Duration,
    scoring_timeout: Duration,
}

impl CorrectionArbiter {
    /// Fails when a strategy is named like the baseline, is registered
    /// twice, or has no entry in `table`.
    pub fn new(
        strategies: Vec<Arc<dyn CorrectionBackend>>,
        scorer: Arc<dyn QualityScorer>,
        table: EffectivenessTable,
        correction_timeout: Duration,
        scoring_timeout: Duration,
    ) -> Result<Self, CoreError> {
        let methods: Vec<&str> = strategies.iter().map(|s| s.method()).collect();
        for (i, method) in methods.iter().enumerate() {
            if *method == ORIGINAL_METHOD {
                return Err(CoreError::Validation(format!(
                    "'{ORIGINAL_METHOD}' is reserved for the uncorrected baseline"
                )));
            }
            if methods[..i].contains(method) {
                return Err(CoreError::Validation(format!("Correction method '{method}' registered twice")));
            }
        }
        table.validate(&methods)?;

        Ok(Self {
            strategies,
            scorer,
            table,
            correction_timeout,
            scoring_timeout,
        })
    }

    pub fn methods(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Run every strategy and pick the best composite score.
    pub async fn arbitrate(&self, request: &ArbitrationRequest) -> Result<CorrectionComparison, PipelineError> {
        let correction = CorrectionRequest {
            image_url: request.generated_url.clone(),
            mask_url: request.mask_url.clone(),
            issue_descriptions: request.issues.iter().map(|i| i.description.clone()).collect(),
        };

        let baseline = self.quality_of(request, &request.generated_url);
        let attempts = join_all(
            self.strategies
                .iter()
                .map(|strategy| self.attempt(strategy.as_ref(), request, &correction)),
        );
        let (baseline, attempts) = tokio::join!(baseline, attempts);
        let baseline_quality = baseline?;

        let baseline_result = CorrectionResult {
            image_url: request.generated_url.clone(),
            method: ORIGINAL_METHOD.to_string(),
            processing_time_ms: 0,
            quality_score: baseline_quality,
            correction_score: correction_score(&self.table, ORIGINAL_METHOD, &request.issues),
            issues_addressed: issues_addressed(&self.table, ORIGINAL_METHOD, &request.issues),
            failure: None,
        };

        let mut results = Vec::with_capacity(attempts.len() + 1);
        results.push(baseline_result.clone());
        for (strategy, attempt) in self.strategies.iter().zip(attempts) {
            let method = strategy.method();
            let result = match attempt {
                Ok((image_url, processing_time_ms, quality_score)) => CorrectionResult {
                    image_url,
                    method: method.to_string(),
                    processing_time_ms,
                    quality_score,
                    correction_score: correction_score(&self.table, method, &request.issues),
                    issues_addressed: issues_addressed(&self.table, method, &request.issues),
                    failure: None,
                },
                Err(e) => {
                    tracing::warn!(method, error = %e, "Correction strategy failed, using baseline");
                    CorrectionResult {
                        method: method.to_string(),
                        issues_addressed: Vec::new(),
                        failure: Some(e.to_string()),
                        ..baseline_result.clone()
                    }
                }
            };
            results.push(result);
        }

        let comparison = CorrectionComparison::from_results(results, &request.issues)?;
        tracing::info!(
            best_method = %comparison.best_method,
            improvement = comparison.improvement,
            issue_count = request.issues.len(),
            "Correction arbitration finished",
        );
        Ok(comparison)
    }

    /// Correct with one strategy and score its output.
    async fn attempt(
        &self,
        strategy: &dyn CorrectionBackend,
        request: &ArbitrationRequest,
        correction: &CorrectionRequest,
    ) -> Result<(String, u64, f64), BackendError> {
        let started = Instant::now();
        let output = with_timeout("correction", self.correction_timeout, strategy.correct(correction)).await?;
        let processing_time_ms = if output.processing_time_ms > 0 {
            output.processing_time_ms
        } else {
            started.elapsed().as_millis() as u64
        };
        let quality = self.quality_of(request, &output.image_url).await?;
        Ok((output.image_url, processing_time_ms, quality))
    }

    async fn quality_of(&self, request: &ArbitrationRequest, image_url: &str) -> Result<f64, BackendError> {
        let score_request = ScoreRequest {
            original_url: request.background_url.clone(),
            generated_url: image_url.to_string(),
            mask_url: request.mask_url.clone(),
            style_reference_url: request.style_reference_url.clone(),
        };
        let scores = with_timeout("scoring", self.scoring_timeout, self.scorer.score(&score_request)).await?;
        Ok(overall_quality(&scores))
    }
}
