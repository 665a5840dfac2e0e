//! HTTP quality-scoring service client.

use async_trait::async_trait;
use posecraft_core::metrics::QualityScores;
use serde::Deserialize;

use crate::comfy::parse_response;
use crate::error::BackendError;
use crate::traits::{QualityScorer, ScoreRequest};

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    ssim: f64,
    pose_accuracy: f64,
    color_delta: f64,
    #[serde(default)]
    style_consistency: Option<f64>,
}

impl ScoreResponse {
    /// Unit scores must lie in `[0, 1]`; colour delta is only required to
    /// be non-negative.
    fn into_scores(self) -> Result<QualityScores, BackendError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(v)
            } else {
                Err(BackendError::InvalidResponse(format!("{name} out of range: {v}")))
            }
        };
        if !(self.color_delta.is_finite() && self.color_delta >= 0.0) {
            return Err(BackendError::InvalidResponse(format!(
                "color_delta must be non-negative, got {}",
                self.color_delta
            )));
        }
        Ok(QualityScores {
            ssim: unit("ssim", self.ssim)?,
            pose_accuracy: unit("pose_accuracy", self.pose_accuracy)?,
            color_delta: self.color_delta,
            style_consistency: self
                .style_consistency
                .map(|v| unit("style_consistency", v))
                .transpose()?,
        })
    }
}

pub struct HttpQualityScorer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpQualityScorer {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl QualityScorer for HttpQualityScorer {
    async fn score(&self, request: &ScoreRequest) -> Result<QualityScores, BackendError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        let body: ScoreResponse = parse_response(response).await?;
        body.into_scores()
    }
}
