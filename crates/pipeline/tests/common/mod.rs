//! Fixed-output collaborators and fixtures shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use posecraft_backends::{
    BackendError, CorrectionBackend, CorrectionOutput, CorrectionRequest, GenerationBackend, GenerationOutput,
    GenerationRequest, ImageLoader, QualityScorer, ScoreRequest,
};
use posecraft_core::alignment::{PoseExtractor, SceneAligner, SceneAnalyzer};
use posecraft_core::correction::EffectivenessTable;
use posecraft_core::error::CoreError;
use posecraft_core::issues::{DetectedIssue, DetectionRequest, IssueDetector, IssueType};
use posecraft_core::metrics::QualityScores;
use posecraft_core::pose::PoseKeypoint;
use posecraft_core::scene::{PoseStyle, SceneType};
use posecraft_core::status::ProjectStatus;
use posecraft_core::style::StyleContext;
use posecraft_core::types::DbId;
use posecraft_core::zones::InsertionZone;
use posecraft_db::models::project::CreateProject;
use posecraft_db::models::variant::CreateVariant;
use posecraft_db::{MemoryStore, Store};
use posecraft_events::EventBus;
use posecraft_pipeline::arbiter::CorrectionArbiter;
use posecraft_pipeline::{PipelineBackends, PipelineConfig, ProjectAligner, VariantOrchestrator};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

/// A standing figure centred in the frame.
pub struct FakePose;

#[async_trait]
impl PoseExtractor for FakePose {
    async fn extract(&self, _url: &str) -> Result<Vec<PoseKeypoint>, CoreError> {
        Ok(vec![
            PoseKeypoint::new("left_shoulder", 0.43, 0.3, 0.9),
            PoseKeypoint::new("right_shoulder", 0.57, 0.3, 0.9),
            PoseKeypoint::new("left_hip", 0.45, 0.5, 0.9),
            PoseKeypoint::new("right_hip", 0.55, 0.5, 0.9),
            PoseKeypoint::new("left_knee", 0.45, 0.62, 0.9),
            PoseKeypoint::new("right_knee", 0.55, 0.62, 0.9),
            PoseKeypoint::new("left_ankle", 0.45, 0.74, 0.9),
            PoseKeypoint::new("right_ankle", 0.55, 0.74, 0.9),
        ])
    }
}

/// Proposes whatever `zones` holds; empty means no insertion zone.
pub struct FakeScene {
    pub zones: Mutex<Vec<InsertionZone>>,
    pub calls: Mutex<usize>,
}

impl Default for FakeScene {
    fn default() -> Self {
        Self {
            zones: Mutex::new(vec![InsertionZone {
                x_start: 0.3,
                x_end: 0.7,
                width: 0.4,
                avg_depth: 0.75,
                stability_score: 0.9,
            }]),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl SceneAnalyzer for FakeScene {
    async fn propose_zones(&self, _url: &str) -> Result<Vec<InsertionZone>, CoreError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.zones.lock().unwrap().clone())
    }
}

/// Serves a plain background for `bg.png`.
pub struct FakeLoader;

#[async_trait]
impl ImageLoader for FakeLoader {
    async fn load(&self, url: &str) -> Result<DynamicImage, BackendError> {
        match url {
            "bg.png" => Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([120, 140, 160])))),
            _ => Err(BackendError::Image(format!("no such image {url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeGenerator {
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub failing_seeds: HashSet<i64>,
    /// Seeds that take this long before answering.
    pub slow_seeds: HashMap<i64, Duration>,
    /// Fired when the given seed starts generating.
    pub cancel_on: Option<(i64, CancellationToken)>,
}

impl FakeGenerator {
    pub fn seeds_called(&self) -> Vec<i64> {
        self.requests.lock().unwrap().iter().map(|r| r.seed).collect()
    }
}

pub fn generated_url(seed: i64) -> String {
    format!("gen-{seed}.png")
}

#[async_trait]
impl GenerationBackend for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some((seed, token)) = &self.cancel_on {
            if *seed == request.seed {
                token.cancel();
            }
        }
        if let Some(delay) = self.slow_seeds.get(&request.seed) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_seeds.contains(&request.seed) {
            return Err(BackendError::Api {
                status: 500,
                body: format!("seed {} exploded", request.seed),
            });
        }
        Ok(GenerationOutput {
            image_url: generated_url(request.seed),
            generation_time_secs: 10.0 + request.seed as f64 / 1000.0,
            backend_request_id: format!("req-{}", request.seed),
        })
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Issues keyed by generated image URL; anything else is clean.
#[derive(Default)]
pub struct FakeDetector {
    pub issues: HashMap<String, Vec<DetectedIssue>>,
}

#[async_trait]
impl IssueDetector for FakeDetector {
    async fn detect(&self, request: &DetectionRequest) -> Result<Vec<DetectedIssue>, CoreError> {
        Ok(self.issues.get(&request.generated_url).cloned().unwrap_or_default())
    }
}

pub fn issue(issue_type: IssueType, severity: f64) -> DetectedIssue {
    DetectedIssue {
        issue_type,
        severity,
        location: None,
        description: format!("{} detected", issue_type.as_str()),
    }
}

// ---------------------------------------------------------------------------
// Correction
// ---------------------------------------------------------------------------

pub struct FakeCorrection {
    pub method: String,
    pub fail: bool,
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<CorrectionRequest>>,
}

impl FakeCorrection {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            fail: false,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(method: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(method)
        }
    }

    pub fn slow(method: &str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(method)
        }
    }
}

pub fn corrected_url(method: &str) -> String {
    format!("{method}-fixed.png")
}

#[async_trait]
impl CorrectionBackend for FakeCorrection {
    fn method(&self) -> &str {
        &self.method
    }

    async fn correct(&self, request: &CorrectionRequest) -> Result<CorrectionOutput, BackendError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(BackendError::Api {
                status: 502,
                body: format!("{} unavailable", self.method),
            });
        }
        Ok(CorrectionOutput {
            image_url: corrected_url(&self.method),
            processing_time_ms: 1500,
        })
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

pub const PERFECT: QualityScores = QualityScores {
    ssim: 1.0,
    pose_accuracy: 1.0,
    color_delta: 0.0,
    style_consistency: None,
};

/// Scores keyed by scored image URL; unknown URLs score [`PERFECT`].
#[derive(Default)]
pub struct FakeScorer {
    pub scores: Mutex<HashMap<String, QualityScores>>,
    pub failing: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeScorer {
    pub fn set(&self, url: &str, scores: QualityScores) {
        self.scores.lock().unwrap().insert(url.to_string(), scores);
    }

    pub fn fail_on(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl QualityScorer for FakeScorer {
    async fn score(&self, request: &ScoreRequest) -> Result<QualityScores, BackendError> {
        self.calls.lock().unwrap().push(request.generated_url.clone());
        if self.failing.lock().unwrap().contains(&request.generated_url) {
            return Err(BackendError::Api {
                status: 503,
                body: "scorer overloaded".into(),
            });
        }
        Ok(self
            .scores
            .lock()
            .unwrap()
            .get(&request.generated_url)
            .copied()
            .unwrap_or(PERFECT))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// With every image scoring quality 1.0 and one pose-drift issue of
/// severity 1, composites are original 0.80, A 0.90, B 0.84.
pub fn table() -> EffectivenessTable {
    let entry = |v: f64| BTreeMap::from([(IssueType::PoseDrift, v), (IssueType::Artifact, v)]);
    EffectivenessTable::new(BTreeMap::from([
        ("original".to_string(), entry(0.5)),
        ("A".to_string(), entry(0.75)),
        ("B".to_string(), entry(0.6)),
    ]))
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        inter_variant_delay: Duration::ZERO,
        generation_timeout: Duration::from_secs(2),
        detection_timeout: Duration::from_secs(2),
        correction_timeout: Duration::from_secs(2),
        scoring_timeout: Duration::from_secs(2),
        alignment_timeout: Duration::from_secs(2),
        lease_timeout: Duration::from_secs(120),
        per_variant_cost: 0.05,
        worker_concurrency: 2,
        dispatch_poll_interval: Duration::from_millis(10),
    }
}

pub fn arbiter(
    strategies: Vec<Arc<FakeCorrection>>,
    scorer: Arc<FakeScorer>,
    config: &PipelineConfig,
) -> CorrectionArbiter {
    CorrectionArbiter::new(
        strategies
            .into_iter()
            .map(|s| s as Arc<dyn CorrectionBackend>)
            .collect(),
        scorer,
        table(),
        config.correction_timeout,
        config.scoring_timeout,
    )
    .unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub scene: Arc<FakeScene>,
    pub mask_dir: tempfile::TempDir,
    pub generator: Arc<FakeGenerator>,
    pub scorer: Arc<FakeScorer>,
    pub strategies: Vec<Arc<FakeCorrection>>,
    pub events: Arc<EventBus>,
    pub orchestrator: Arc<VariantOrchestrator>,
}

impl Harness {
    pub fn new(generator: FakeGenerator, detector: FakeDetector, strategies: Vec<FakeCorrection>) -> Self {
        Self::with_config(generator, detector, strategies, test_config())
    }

    pub fn with_config(
        generator: FakeGenerator,
        detector: FakeDetector,
        strategies: Vec<FakeCorrection>,
        config: PipelineConfig,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let generator = Arc::new(generator);
        let scorer = Arc::new(FakeScorer::default());
        let strategies: Vec<Arc<FakeCorrection>> = strategies.into_iter().map(Arc::new).collect();
        let events = Arc::new(EventBus::default());
        let scene = Arc::new(FakeScene::default());
        let mask_dir = tempfile::tempdir().unwrap();
        let aligner = ProjectAligner::new(
            store.clone(),
            SceneAligner::new(Arc::new(FakePose), scene.clone()),
            Arc::new(FakeLoader),
            mask_dir.path(),
        );

        let backends = PipelineBackends {
            aligner: Arc::new(aligner),
            generator: generator.clone(),
            detector: Arc::new(detector),
            arbiter: Arc::new(arbiter(strategies.clone(), scorer.clone(), &config)),
            scorer: scorer.clone(),
        };
        let orchestrator = Arc::new(VariantOrchestrator::new(store.clone(), backends, events.clone(), config));

        Self {
            store,
            scene,
            mask_dir,
            generator,
            scorer,
            strategies,
            events,
            orchestrator,
        }
    }

    /// A pending project with one variant per seed and a supplied mask.
    pub async fn project(&self, seeds: &[i64]) -> DbId {
        self.project_with_mask(seeds, Some("mask.png")).await
    }

    pub async fn project_with_mask(&self, seeds: &[i64], mask_url: Option<&str>) -> DbId {
        let project = self
            .store
            .create_project(&CreateProject {
                name: "Terrace shoot".into(),
                background_url: "bg.png".into(),
                mask_url: mask_url.map(str::to_string),
                pose_reference_url: "pose.png".into(),
                scene_type: SceneType::Terrace,
                pose_style: PoseStyle::Standing,
                variant_count: seeds.len() as i16,
                controlnet_strength: 1.0,
                guidance_scale: 7.5,
                style: StyleContext::default(),
                prompt: "woman on a terrace".into(),
                custom_prompt: true,
            })
            .await
            .unwrap();
        let inputs: Vec<CreateVariant> = seeds
            .iter()
            .enumerate()
            .map(|(i, seed)| CreateVariant {
                variant_number: i as i16 + 1,
                seed: *seed,
            })
            .collect();
        self.store.create_variants(project.id, &inputs).await.unwrap();
        project.id
    }

    pub async fn project_status(&self, project_id: DbId) -> ProjectStatus {
        self.store.find_project(project_id).await.unwrap().status().unwrap()
    }

    /// Wait until the project reaches `status`, failing after five seconds.
    pub async fn wait_for(&self, project_id: DbId, status: ProjectStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.project_status(project_id).await != status {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("project {project_id} never reached {status}"));
    }
}

/// Standard harness: variant 2 (seed 222) has a pose-drift issue; A and B
/// are registered in that order.
pub fn scenario() -> Harness {
    let detector = FakeDetector {
        issues: HashMap::from([(generated_url(222), vec![issue(IssueType::PoseDrift, 1.0)])]),
    };
    Harness::new(
        FakeGenerator::default(),
        detector,
        vec![FakeCorrection::new("A"), FakeCorrection::new("B")],
    )
}
