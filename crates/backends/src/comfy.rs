//! Generation through a ComfyUI-style workflow API.
//!
//! A generation is one inpainting workflow conditioned on the pose
//! reference through an OpenPose ControlNet. The client submits it with
//! `POST /prompt`, polls `GET /history/{prompt_id}` until the save node
//! reports an output image, then resolves that image through `/view`.
//!
//! A queued prompt that is abandoned before it produces an image, for
//! example because the caller's timeout dropped the generation, is removed
//! from the server queue and interrupted if already running.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::BackendError;
use crate::retry::{retry, retry_if, RetryConfig};
use crate::traits::{GenerationBackend, GenerationOutput, GenerationRequest};

const NEGATIVE_PROMPT: &str = "blurry, distorted anatomy, extra limbs, duplicate person, low quality, watermark";

/// Id of the node whose output is the final image.
pub const SAVE_NODE: &str = "12";

// ---------------------------------------------------------------------------
// REST API
// ---------------------------------------------------------------------------

/// Response of `POST /prompt` after queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub prompt_id: String,
    /// Position in the execution queue.
    pub number: i32,
}

/// Thin HTTP wrapper over the workflow endpoints.
#[derive(Clone)]
pub struct ComfyApi {
    client: reqwest::Client,
    api_url: String,
}

impl ComfyApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Queue a workflow. `extra_data` travels with the prompt and is
    /// embedded in the saved image's metadata.
    pub async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
        extra_data: Option<&Value>,
    ) -> Result<SubmitResponse, BackendError> {
        let mut body = json!({
            "prompt": workflow,
            "client_id": client_id,
        });
        if let Some(extra) = extra_data {
            body["extra_data"] = extra.clone();
        }

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        parse_response(response).await
    }

    /// Execution history for one prompt. Empty until execution finishes.
    pub async fn get_history(&self, prompt_id: &str) -> Result<Value, BackendError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        parse_response(response).await
    }

    /// Drop a prompt from the pending queue and stop it if it is running.
    pub async fn cancel_prompt(&self, prompt_id: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&json!({ "delete": [prompt_id] }))
            .send()
            .await?;
        ensure_success(response).await?;

        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .json(&json!({ "prompt_id": prompt_id }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Public URL of an output file.
    pub fn view_url(&self, image: &OutputImage) -> Result<String, BackendError> {
        let mut url = reqwest::Url::parse(&format!("{}/view", self.api_url))
            .map_err(|e| BackendError::InvalidResponse(format!("bad api url '{}': {e}", self.api_url)))?;
        url.query_pairs_mut()
            .append_pair("filename", &image.filename)
            .append_pair("subfolder", &image.subfolder)
            .append_pair("type", &image.kind);
        Ok(url.into())
    }
}

/// Return the response unchanged on a 2xx status, or an
/// [`BackendError::Api`] with the status and body text.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(BackendError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Model and sampler settings shared by every generation.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub checkpoint: String,
    pub controlnet_model: String,
    pub steps: u32,
    pub sampler: String,
    pub scheduler: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            checkpoint: "sd_xl_base_1.0_inpainting.safetensors".into(),
            controlnet_model: "control_v11p_sd15_openpose.pth".into(),
            steps: 30,
            sampler: "dpmpp_2m".into(),
            scheduler: "karras".into(),
        }
    }
}

/// Build the inpainting + OpenPose ControlNet graph for one request.
pub fn build_workflow(request: &GenerationRequest, settings: &WorkflowSettings) -> Value {
    json!({
        "1": { "class_type": "LoadImage", "inputs": { "image": request.background_url } },
        "2": { "class_type": "LoadImageMask", "inputs": { "image": request.mask_url, "channel": "red" } },
        "3": { "class_type": "LoadImage", "inputs": { "image": request.pose_reference_url } },
        "4": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": settings.checkpoint } },
        "5": { "class_type": "CLIPTextEncode", "inputs": { "text": request.prompt, "clip": ["4", 1] } },
        "6": { "class_type": "CLIPTextEncode", "inputs": { "text": NEGATIVE_PROMPT, "clip": ["4", 1] } },
        "7": { "class_type": "ControlNetLoader", "inputs": { "control_net_name": settings.controlnet_model } },
        "8": {
            "class_type": "ControlNetApplyAdvanced",
            "inputs": {
                "positive": ["5", 0],
                "negative": ["6", 0],
                "control_net": ["7", 0],
                "image": ["3", 0],
                "strength": request.controlnet_strength,
                "start_percent": 0.0,
                "end_percent": 1.0
            }
        },
        "9": {
            "class_type": "VAEEncodeForInpaint",
            "inputs": { "pixels": ["1", 0], "vae": ["4", 2], "mask": ["2", 0], "grow_mask_by": 6 }
        },
        "10": {
            "class_type": "KSampler",
            "inputs": {
                "model": ["4", 0],
                "positive": ["8", 0],
                "negative": ["8", 1],
                "latent_image": ["9", 0],
                "seed": request.seed,
                "steps": settings.steps,
                "cfg": request.guidance_scale,
                "sampler_name": settings.sampler,
                "scheduler": settings.scheduler,
                "denoise": 1.0
            }
        },
        "11": { "class_type": "VAEDecode", "inputs": { "samples": ["10", 0], "vae": ["4", 2] } },
        "12": { "class_type": "SaveImage", "inputs": { "images": ["11", 0], "filename_prefix": "posecraft" } }
    })
}

/// Keypoints carried as image metadata so the generated file records the
/// pose it was conditioned on.
fn extra_data(request: &GenerationRequest) -> Value {
    json!({ "extra_pnginfo": { "pose_keypoints": request.keypoints, "seed": request.seed } })
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// An output file reported in the history.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "output_kind")]
    pub kind: String,
}

fn output_kind() -> String {
    "output".to_string()
}

/// Inspect a history response. `Ok(None)` while the prompt is still queued
/// or running.
pub fn extract_output(history: &Value, prompt_id: &str) -> Result<Option<OutputImage>, BackendError> {
    let Some(entry) = history.get(prompt_id) else {
        return Ok(None);
    };

    if entry.pointer("/status/status_str").and_then(Value::as_str) == Some("error") {
        return Err(BackendError::Api {
            status: 500,
            body: format!("prompt {prompt_id} failed during execution"),
        });
    }

    let Some(outputs) = entry.get("outputs").and_then(Value::as_object) else {
        return Ok(None);
    };
    let images = outputs
        .get(SAVE_NODE)
        .or_else(|| outputs.values().find(|o| o.get("images").is_some()))
        .and_then(|o| o.get("images"))
        .and_then(Value::as_array);

    match images.and_then(|imgs| imgs.first()) {
        Some(image) => serde_json::from_value(image.clone())
            .map(Some)
            .map_err(|e| BackendError::InvalidResponse(format!("malformed output image: {e}"))),
        None if entry.pointer("/status/completed").and_then(Value::as_bool) == Some(true) => Err(
            BackendError::InvalidResponse(format!("prompt {prompt_id} completed without an output image")),
        ),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A prompt on the server that is cancelled when dropped unless
/// [`QueuedPrompt::finish`] was called.
struct QueuedPrompt {
    api: ComfyApi,
    prompt_id: Option<String>,
}

impl QueuedPrompt {
    fn new(api: &ComfyApi, prompt_id: &str) -> Self {
        Self {
            api: api.clone(),
            prompt_id: Some(prompt_id.to_string()),
        }
    }

    fn finish(mut self) {
        self.prompt_id = None;
    }
}

impl Drop for QueuedPrompt {
    fn drop(&mut self) {
        let Some(prompt_id) = self.prompt_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(prompt_id = %prompt_id, "No runtime to cancel abandoned prompt");
            return;
        };
        let api = self.api.clone();
        handle.spawn(async move {
            match api.cancel_prompt(&prompt_id).await {
                Ok(()) => tracing::info!(prompt_id = %prompt_id, "Cancelled abandoned prompt"),
                Err(e) => tracing::warn!(prompt_id = %prompt_id, error = %e, "Failed to cancel abandoned prompt"),
            }
        });
    }
}

/// [`GenerationBackend`] backed by a workflow server.
pub struct ComfyGenerationClient {
    api: ComfyApi,
    settings: WorkflowSettings,
    retry: RetryConfig,
    poll_interval: Duration,
}

impl ComfyGenerationClient {
    pub fn new(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            api: ComfyApi::new(client, api_url),
            settings: WorkflowSettings::default(),
            retry: RetryConfig::default(),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll until the output image appears. Unbounded; callers wrap the
    /// whole generation in a timeout.
    async fn wait_for_output(&self, prompt_id: &str) -> Result<OutputImage, BackendError> {
        loop {
            let history = retry(&self.retry, "history", || self.api.get_history(prompt_id)).await?;
            if let Some(image) = extract_output(&history, prompt_id)? {
                return Ok(image);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl GenerationBackend for ComfyGenerationClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        let started = Instant::now();
        let workflow = build_workflow(request, &self.settings);
        let extra = extra_data(request);
        let client_id = uuid::Uuid::new_v4().to_string();

        // Resending after the server may have queued the prompt would run it twice.
        let submitted = retry_if(&self.retry, "submit", BackendError::is_resendable, || {
            self.api.submit_workflow(&workflow, &client_id, Some(&extra))
        })
        .await?;
        let queued = QueuedPrompt::new(&self.api, &submitted.prompt_id);
        tracing::debug!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            seed = request.seed,
            "Workflow queued",
        );

        let image = self.wait_for_output(&submitted.prompt_id).await?;
        queued.finish();
        let image_url = self.api.view_url(&image)?;

        Ok(GenerationOutput {
            image_url,
            generation_time_secs: started.elapsed().as_secs_f64(),
            backend_request_id: submitted.prompt_id,
        })
    }
}
