mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use posecraft_backends::comfy::ComfyGenerationClient;
use posecraft_backends::correction::HttpCorrectionClient;
use posecraft_backends::images::HttpImageLoader;
use posecraft_backends::pose::PoseServiceClient;
use posecraft_backends::scoring::HttpQualityScorer;
use posecraft_backends::{CorrectionBackend, ImageLoader, QualityScorer};
use posecraft_core::alignment::{PoseExtractor, SceneAligner, SceneAnalyzer};
use posecraft_core::correction::EffectivenessTable;
use posecraft_core::style::ColorHistogramEmbedder;
use posecraft_db::{MemoryStore, PgStore, Store};
use posecraft_events::{EventBus, EventLogger};
use posecraft_pipeline::arbiter::CorrectionArbiter;
use posecraft_pipeline::detector::{EdgeSceneAnalyzer, ImageIssueDetector};
use posecraft_pipeline::dispatcher::ProjectDispatcher;
use posecraft_pipeline::queue::RunQueue;
use posecraft_pipeline::{PipelineBackends, ProjectAligner, VariantOrchestrator};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{LogFormat, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;
    init_tracing(config.log_format);
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        scoring_url = %config.scoring_url,
        pose_service_url = %config.pose_service_url,
        mask_dir = %config.mask_dir.display(),
        concurrency = config.pipeline.worker_concurrency,
        strategies = config.correction_endpoints.len(),
        "Loaded worker configuration",
    );

    // --- Storage ---
    let store = open_store(config.database_url.as_deref()).await?;

    // --- Backends ---
    let table = match &config.effectiveness_path {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            EffectivenessTable::from_json(&json)?
        }
        None => EffectivenessTable::default(),
    };

    let client = reqwest::Client::new();
    let loader: Arc<dyn ImageLoader> = Arc::new(HttpImageLoader::new(client.clone()));
    let pose: Arc<dyn PoseExtractor> = Arc::new(PoseServiceClient::new(client.clone(), &config.pose_service_url));
    let scene: Arc<dyn SceneAnalyzer> = Arc::new(EdgeSceneAnalyzer::new(Arc::clone(&loader)));
    let aligner = ProjectAligner::new(
        Arc::clone(&store),
        SceneAligner::new(pose, scene),
        Arc::clone(&loader),
        &config.mask_dir,
    );
    let scorer: Arc<dyn QualityScorer> = Arc::new(HttpQualityScorer::new(client.clone(), &config.scoring_url));
    let strategies: Vec<Arc<dyn CorrectionBackend>> = config
        .correction_endpoints
        .iter()
        .map(|endpoint| {
            Arc::new(
                HttpCorrectionClient::new(client.clone(), &endpoint.method, &endpoint.url)
                    .with_api_key(config.correction_api_key.clone()),
            ) as Arc<dyn CorrectionBackend>
        })
        .collect();
    let arbiter = CorrectionArbiter::new(
        strategies,
        Arc::clone(&scorer),
        table,
        config.pipeline.correction_timeout,
        config.pipeline.scoring_timeout,
    )?;
    tracing::info!(methods = ?arbiter.methods(), "Correction strategies registered");

    let backends = PipelineBackends {
        generator: Arc::new(ComfyGenerationClient::new(client.clone(), &config.comfyui_url)),
        detector: Arc::new(ImageIssueDetector::new(loader, Arc::new(ColorHistogramEmbedder))),
        arbiter: Arc::new(arbiter),
        scorer,
        aligner: Arc::new(aligner),
    };

    // --- Event bus ---
    let events = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(EventLogger::run(events.subscribe()));

    // --- Run queue and dispatcher ---
    let orchestrator = Arc::new(VariantOrchestrator::new(
        Arc::clone(&store),
        backends,
        Arc::clone(&events),
        config.pipeline.clone(),
    ));
    let shutdown = CancellationToken::new();
    let (queue, pool_handle) = RunQueue::start(
        Arc::clone(&orchestrator),
        config.pipeline.worker_concurrency,
        shutdown.clone(),
    );
    let dispatcher = ProjectDispatcher::new(Arc::clone(&store), queue, config.pipeline.dispatch_poll_interval)
        .with_lease_timeout(config.pipeline.lease_timeout);
    let dispatch_cancel = shutdown.clone();
    let dispatch_handle = tokio::spawn(async move {
        dispatcher.run(dispatch_cancel).await;
    });
    tracing::info!("Worker started");

    shutdown_signal().await;

    // --- Shutdown ---
    tracing::info!("Shutdown requested, stopping dispatch");
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatch_handle).await;
    if tokio::time::timeout(config.shutdown_timeout, pool_handle).await.is_err() {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "In-flight runs did not finish, leaving them for recovery",
        );
    }

    // Dropping the last bus handles closes the channel and ends the logger.
    drop(orchestrator);
    drop(events);
    if let Ok(Ok(logged)) = tokio::time::timeout(Duration::from_secs(5), logger_handle).await {
        tracing::info!(logged, "Event logger stopped");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "posecraft_worker=debug,posecraft_pipeline=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_store(database_url: Option<&str>) -> anyhow::Result<Arc<dyn Store>> {
    let Some(url) = database_url else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = posecraft_db::create_pool(url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    posecraft_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Arc::new(PgStore::new(pool)))
}

/// Wait for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
