//! HTTP correction strategies.
//!
//! Each strategy is a separate endpoint taking
//! `{image_url, mask_url, issues}` and answering
//! `{image_url, processing_time_ms}`.

use async_trait::async_trait;
use serde::Serialize;

use crate::comfy::parse_response;
use crate::error::BackendError;
use crate::traits::{CorrectionBackend, CorrectionOutput, CorrectionRequest};

#[derive(Serialize)]
struct CorrectBody<'a> {
    image_url: &'a str,
    mask_url: &'a str,
    issues: &'a [String],
}

pub struct HttpCorrectionClient {
    client: reqwest::Client,
    method: String,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCorrectionClient {
    pub fn new(client: reqwest::Client, method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            method: method.into(),
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CorrectionBackend for HttpCorrectionClient {
    fn method(&self) -> &str {
        &self.method
    }

    async fn correct(&self, request: &CorrectionRequest) -> Result<CorrectionOutput, BackendError> {
        let body = CorrectBody {
            image_url: &request.image_url,
            mask_url: &request.mask_url,
            issues: &request.issue_descriptions,
        };
        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let output: CorrectionOutput = parse_response(builder.send().await?).await?;
        if output.image_url.trim().is_empty() {
            return Err(BackendError::InvalidResponse(format!(
                "{} returned an empty image_url",
                self.method
            )));
        }
        Ok(output)
    }
}
