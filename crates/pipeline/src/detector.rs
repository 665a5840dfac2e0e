//! Image-backed adapters for the core's pluggable analysis traits.

use std::sync::Arc;

use async_trait::async_trait;
use posecraft_backends::ImageLoader;
use posecraft_core::alignment::SceneAnalyzer;
use posecraft_core::error::CoreError;
use posecraft_core::issues::{detect_pixel_issues, DetectedIssue, DetectionRequest, DetectionThresholds, IssueDetector};
use posecraft_core::style::{parse_palette, StyleContext, StyleEmbedder};
use posecraft_core::zones::{propose_insertion_zones, InsertionZone};

// ---------------------------------------------------------------------------
// Issue detection
// ---------------------------------------------------------------------------

/// [`IssueDetector`] that loads the three images and compares their pixels.
pub struct ImageIssueDetector {
    loader: Arc<dyn ImageLoader>,
    embedder: Arc<dyn StyleEmbedder>,
    thresholds: DetectionThresholds,
}

impl ImageIssueDetector {
    pub fn new(loader: Arc<dyn ImageLoader>, embedder: Arc<dyn StyleEmbedder>) -> Self {
        Self {
            loader,
            embedder,
            thresholds: DetectionThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: DetectionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Embedding the subject is compared against: the style reference
    /// image when given, else the palette, else nothing.
    async fn style_target(&self, style: &StyleContext) -> Result<Option<Vec<f64>>, CoreError> {
        if let Some(url) = &style.reference_url {
            let reference = self.loader.load(url).await?.to_rgb8();
            return Ok(Some(self.embedder.embed(&reference, None)));
        }
        if style.palette.is_empty() {
            return Ok(None);
        }
        let colours = parse_palette(&style.palette)?;
        Ok(Some(self.embedder.embed_palette(&colours)))
    }
}

#[async_trait]
impl IssueDetector for ImageIssueDetector {
    async fn detect(&self, request: &DetectionRequest) -> Result<Vec<DetectedIssue>, CoreError> {
        let (generated, background, mask) = tokio::try_join!(
            self.loader.load(&request.generated_url),
            self.loader.load(&request.background_url),
            self.loader.load(&request.mask_url),
        )?;
        let target = self.style_target(&request.style).await?;

        let issues = detect_pixel_issues(
            &generated.to_rgb8(),
            &background.to_rgb8(),
            &mask.to_luma8(),
            target.as_deref(),
            self.embedder.as_ref(),
            &self.thresholds,
        );
        tracing::debug!(
            generated_url = %request.generated_url,
            issue_count = issues.len(),
            "Issue detection finished",
        );
        Ok(issues)
    }
}

// ---------------------------------------------------------------------------
// Scene analysis
// ---------------------------------------------------------------------------

/// [`SceneAnalyzer`] that finds insertion zones from surface edges in the
/// background image.
pub struct EdgeSceneAnalyzer {
    loader: Arc<dyn ImageLoader>,
}

impl EdgeSceneAnalyzer {
    pub fn new(loader: Arc<dyn ImageLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl SceneAnalyzer for EdgeSceneAnalyzer {
    async fn propose_zones(&self, background_url: &str) -> Result<Vec<InsertionZone>, CoreError> {
        let background = self.loader.load(background_url).await?.to_rgb8();
        Ok(propose_insertion_zones(&background))
    }
}
