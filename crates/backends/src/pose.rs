//! Pose-keypoint service client.

use async_trait::async_trait;
use posecraft_core::alignment::PoseExtractor;
use posecraft_core::error::CoreError;
use posecraft_core::pose::PoseKeypoint;
use serde::Deserialize;
use serde_json::json;

use crate::comfy::parse_response;
use crate::error::BackendError;

#[derive(Debug, Deserialize)]
struct KeypointsResponse {
    keypoints: Vec<PoseKeypoint>,
}

/// [`PoseExtractor`] that asks a remote estimator for named keypoints.
///
/// `POST {endpoint}` with `{"image_url": ...}` answers
/// `{"keypoints": [{name, x, y, confidence}, ...]}` in normalized
/// coordinates.
pub struct PoseServiceClient {
    client: reqwest::Client,
    endpoint: String,
}

impl PoseServiceClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn fetch(&self, image_url: &str) -> Result<Vec<PoseKeypoint>, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "image_url": image_url }))
            .send()
            .await?;
        let body: KeypointsResponse = parse_response(response).await?;
        check_keypoints(body.keypoints)
    }
}

fn check_keypoints(keypoints: Vec<PoseKeypoint>) -> Result<Vec<PoseKeypoint>, BackendError> {
    if let Some(bad) = keypoints
        .iter()
        .find(|k| !(k.x.is_finite() && k.y.is_finite() && (0.0..=1.0).contains(&k.confidence)))
    {
        return Err(BackendError::InvalidResponse(format!("malformed keypoint '{}'", bad.name)));
    }
    Ok(keypoints)
}

#[async_trait]
impl PoseExtractor for PoseServiceClient {
    async fn extract(&self, pose_reference_url: &str) -> Result<Vec<PoseKeypoint>, CoreError> {
        Ok(self.fetch(pose_reference_url).await?)
    }
}
