//! Scene Inference - diagnostic runner
//!
//! Detects host capabilities, initializes the inference manager and, when
//! an image path is given, describes that image once.
//!
//! Usage: `scene_inference [IMAGE_PATH]`

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::StreamExt;
use scene_inference::{
    local_engine::{ComputeDevice, LocalAnalyzer},
    performance_monitor::DEFAULT_TARGET_LATENCY_SEC,
    state::{AppConfig, AppState},
    Error,
};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scene_inference=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Scene Inference v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env();
    tracing::info!(
        remote_base_url = %config.remote_base_url,
        pipeline = %config.pipeline,
        model = %config.model,
        availability_ttl_sec = config.availability_ttl.as_secs(),
        "Configuration loaded"
    );

    let state = AppState::new(config)?;

    // Host checks
    let report = state.detector.validate_environment();
    for issue in &report.issues {
        tracing::warn!(feature = ?issue.feature, severity = ?issue.severity, "{}", issue.message);
    }
    report.into_result()?;

    let capabilities = state.detector.detect_capabilities().await;
    tracing::info!(
        gpu = ?capabilities.gpu_description,
        memory_gb = ?capabilities.memory_limit_gb,
        recommended = %capabilities.recommended_pipeline,
        "Host capabilities"
    );

    state.inference.initialize().await?;
    let models = state.inference.available_models().await;
    tracing::info!(models = ?models, "Available models");

    let Some(path) = std::env::args().nth(1) else {
        tracing::info!("No image given, exiting after initialization");
        state.inference.cleanup().await;
        return Ok(());
    };

    let path = Path::new(&path);
    let bytes = tokio::fs::read(path).await?;
    let image_data = format!("data:{};base64,{}", mime_for(path), STANDARD.encode(&bytes));

    let result = state.inference.analyze(&image_data).await?;
    let gpu_active = state.local_engine.active_device().await == Some(ComputeDevice::Gpu);
    state.monitor.set_gpu_active(gpu_active).await;
    tracing::info!(
        pipeline = %result.pipeline,
        model = %result.model,
        confidence = result.confidence,
        processing_time_sec = result.processing_time,
        "Caption: {}",
        result.caption
    );
    if let Some(reasoning) = &result.reasoning {
        tracing::info!("Reasoning: {}", reasoning);
    }

    if std::env::var("SCENE_STREAM").is_ok() {
        let mut stream = state.inference.analyze_stream(&image_data).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk?);
        }
        tracing::info!("Streamed: {}", text);
    }

    match state.monitor.sample_memory().await {
        Ok(gb) => tracing::debug!(memory_gb = gb, "Memory sampled"),
        Err(e @ Error::OutOfMemory(_)) => tracing::warn!(code = e.code(), "{}", e),
        Err(e) => tracing::warn!(error = %e, "Memory sampling failed"),
    }

    let summary = state.monitor.summary().await;
    let acceptable = state
        .monitor
        .is_performance_acceptable(DEFAULT_TARGET_LATENCY_SEC)
        .await;
    tracing::info!(
        average_latency_sec = summary.average_latency,
        memory_gb = summary.memory_usage_gb,
        acceptable = acceptable,
        "Performance summary"
    );
    for hint in state.monitor.recommendations().await {
        tracing::info!("Recommendation: {}", hint);
    }

    state.inference.cleanup().await;
    Ok(())
}
