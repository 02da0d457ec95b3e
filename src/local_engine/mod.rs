//! LocalEngine - In-process Fallback Analyzer
//!
//! ## Responsibilities
//!
//! - Compute device selection (GPU-class vs CPU-class)
//! - Two-phase model load with progress reporting
//! - Frame decoding (data URI / base64 -> RGBA) and heuristic description
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --initialize()--> Initializing --> Ready
//!       ^                                            |
//!       +------------------- cleanup() --------------+
//! ```
//!
//! The analyzer sits behind [`LocalAnalyzer`] so a real vision model can
//! replace the heuristic without touching the inference manager.

pub mod heuristic;

use crate::capability_detector::HostCapabilities;
use crate::error::{Error, Result};
use crate::models::{AnalysisResult, Pipeline};
use crate::remote_client::strip_data_uri;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use heuristic::PixelStats;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Identifier reported as `AnalysisResult.model`
pub const LOCAL_MODEL_ID: &str = "local-heuristic-v1";

/// Fixed confidence for local results, below the remote pipeline's
pub const LOCAL_CONFIDENCE: f32 = 0.65;

/// Progress callback, receives overall percent in 0..=100
pub type ProgressFn<'a> = dyn Fn(f64) + Send + Sync + 'a;

/// Compute device class chosen at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Gpu,
    Cpu,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Gpu => write!(f, "gpu"),
            ComputeDevice::Cpu => write!(f, "cpu"),
        }
    }
}

/// Sequential load phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    VisionEncoder,
    CaptionDecoder,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPhase::VisionEncoder => write!(f, "vision_encoder"),
            LoadPhase::CaptionDecoder => write!(f, "caption_decoder"),
        }
    }
}

const LOAD_PHASES: [LoadPhase; 2] = [LoadPhase::VisionEncoder, LoadPhase::CaptionDecoder];

/// Lifecycle position, as reported by [`LocalEngine::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Uninitialized,
    Initializing,
    Ready,
}

/// Local analysis capability consumed by the inference manager
#[async_trait]
pub trait LocalAnalyzer: Send + Sync {
    /// Identifier reported in results and model listings
    fn model_id(&self) -> &str;

    /// Load the model. A no-op once ready.
    async fn initialize(&self, on_progress: Option<&ProgressFn<'_>>) -> Result<()>;

    async fn is_ready(&self) -> bool;

    /// Describe a frame. Fails with `LocalEngineNotInitialized` before
    /// initialization has completed.
    async fn analyze(&self, image_data: &str) -> Result<AnalysisResult>;

    /// Release model handles and return to uninitialized. Idempotent.
    async fn cleanup(&self);

    /// Device selected by the last initialization
    async fn active_device(&self) -> Option<ComputeDevice>;
}

/// Load pacing
#[derive(Debug, Clone)]
pub struct LocalEngineConfig {
    /// Delay per progress step
    pub step_delay: Duration,
    pub steps_per_phase: u32,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(100),
            steps_per_phase: 5,
        }
    }
}

impl LocalEngineConfig {
    /// No load delay
    pub fn instant() -> Self {
        Self {
            step_delay: Duration::ZERO,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
struct ModelHandle {
    phase: LoadPhase,
    loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum EngineState {
    Uninitialized,
    Initializing,
    Ready {
        device: ComputeDevice,
        handles: Vec<ModelHandle>,
    },
}

/// LocalEngine service
pub struct LocalEngine {
    host: Arc<dyn HostCapabilities>,
    config: LocalEngineConfig,
    state: RwLock<EngineState>,
    /// Serializes initialize/cleanup
    lifecycle: Mutex<()>,
}

impl LocalEngine {
    /// Create new LocalEngine
    pub fn new(host: Arc<dyn HostCapabilities>) -> Self {
        Self::with_config(host, LocalEngineConfig::default())
    }

    pub fn with_config(host: Arc<dyn HostCapabilities>, config: LocalEngineConfig) -> Self {
        Self {
            host,
            config,
            state: RwLock::new(EngineState::Uninitialized),
            lifecycle: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> EngineStatus {
        match *self.state.read().await {
            EngineState::Uninitialized => EngineStatus::Uninitialized,
            EngineState::Initializing => EngineStatus::Initializing,
            EngineState::Ready { .. } => EngineStatus::Ready,
        }
    }

    fn select_device(&self) -> ComputeDevice {
        match self.host.gpu_adapter() {
            Some(adapter) => {
                tracing::debug!(adapter = %adapter, "Local engine using GPU");
                ComputeDevice::Gpu
            }
            None => ComputeDevice::Cpu,
        }
    }

    async fn load_phase(
        &self,
        index: usize,
        phase: LoadPhase,
        device: ComputeDevice,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> ModelHandle {
        let steps = self.config.steps_per_phase.max(1);
        tracing::debug!(phase = %phase, device = %device, "Loading local model phase");

        for step in 1..=steps {
            if !self.config.step_delay.is_zero() {
                tokio::time::sleep(self.config.step_delay).await;
            }
            let percent = (index as f64 + step as f64 / steps as f64) / LOAD_PHASES.len() as f64 * 100.0;
            if let Some(report) = on_progress {
                report(percent.min(100.0));
            }
        }

        ModelHandle {
            phase,
            loaded_at: Utc::now(),
        }
    }
}

/// Decode a data URI or bare base64 frame into RGBA pixels
pub fn decode_frame(image_data: &str) -> Result<RgbaImage> {
    let payload = strip_data_uri(image_data).trim();
    if payload.is_empty() {
        return Err(Error::ImageDecode("empty image payload".to_string()));
    }

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| Error::ImageDecode(format!("invalid base64: {}", e)))?;
    let frame = image::load_from_memory(&bytes)
        .map_err(|e| Error::ImageDecode(e.to_string()))?;

    Ok(frame.to_rgba8())
}

#[async_trait]
impl LocalAnalyzer for LocalEngine {
    fn model_id(&self) -> &str {
        LOCAL_MODEL_ID
    }

    async fn initialize(&self, on_progress: Option<&ProgressFn<'_>>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if matches!(*self.state.read().await, EngineState::Ready { .. }) {
            tracing::debug!("Local engine already initialized");
            return Ok(());
        }

        *self.state.write().await = EngineState::Initializing;
        let start = Instant::now();
        let device = self.select_device();

        if let Some(report) = on_progress {
            report(0.0);
        }

        let mut handles = Vec::with_capacity(LOAD_PHASES.len());
        for (index, phase) in LOAD_PHASES.iter().enumerate() {
            handles.push(self.load_phase(index, *phase, device, on_progress).await);
        }

        *self.state.write().await = EngineState::Ready { device, handles };

        tracing::info!(
            device = %device,
            model = LOCAL_MODEL_ID,
            load_ms = start.elapsed().as_millis() as u64,
            "Local engine ready"
        );
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        matches!(*self.state.read().await, EngineState::Ready { .. })
    }

    async fn analyze(&self, image_data: &str) -> Result<AnalysisResult> {
        if !self.is_ready().await {
            return Err(Error::LocalEngineNotInitialized);
        }

        let start = Instant::now();
        let frame = decode_frame(image_data)?;
        let stats = PixelStats::from_rgba(&frame);
        let description = heuristic::describe(&stats);
        let elapsed = start.elapsed().as_secs_f64();

        tracing::debug!(
            brightness = ?stats.brightness,
            complexity = ?stats.complexity,
            width = stats.width,
            height = stats.height,
            processing_time_sec = elapsed,
            "Local analysis completed"
        );

        Ok(AnalysisResult::new(
            description.caption,
            Some(description.reasoning),
            LOCAL_CONFIDENCE,
            elapsed,
            Pipeline::Local,
            LOCAL_MODEL_ID.to_string(),
        ))
    }

    async fn cleanup(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let mut state = self.state.write().await;

        if let EngineState::Ready { handles, .. } = &*state {
            for handle in handles {
                tracing::debug!(
                    phase = %handle.phase,
                    loaded_at = %handle.loaded_at,
                    "Releasing local model handle"
                );
            }
            tracing::info!("Local engine released");
        }
        *state = EngineState::Uninitialized;
    }

    async fn active_device(&self) -> Option<ComputeDevice> {
        match *self.state.read().await {
            EngineState::Ready { device, .. } => Some(device),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability_detector::StaticHostCapabilities;
    use image::{DynamicImage, ImageOutputFormat, Rgba};
    use std::io::Cursor;

    fn png_data_uri(rgb: [u8; 3]) -> String {
        let frame = RgbaImage::from_pixel(64, 48, Rgba([rgb[0], rgb[1], rgb[2], 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(frame)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(bytes))
    }

    fn engine(host: StaticHostCapabilities) -> LocalEngine {
        LocalEngine::with_config(Arc::new(host), LocalEngineConfig::instant())
    }

    #[tokio::test]
    async fn test_analyze_before_initialize_fails() {
        let engine = engine(StaticHostCapabilities::all_supported());
        let err = engine.analyze(&png_data_uri([0, 0, 0])).await.unwrap_err();
        assert!(matches!(err, Error::LocalEngineNotInitialized));
        assert_eq!(engine.status().await, EngineStatus::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_reports_monotonic_progress() {
        let engine = engine(StaticHostCapabilities::all_supported());
        let seen = std::sync::Mutex::new(Vec::new());

        engine
            .initialize(Some(&|p: f64| seen.lock().unwrap().push(p)))
            .await
            .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first().copied(), Some(0.0));
        assert_eq!(seen.last().copied(), Some(100.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|p| (0.0..=100.0).contains(p)));
        assert!(engine.is_ready().await);
        assert_eq!(engine.active_device().await, Some(ComputeDevice::Gpu));
    }

    #[tokio::test]
    async fn test_reinitialize_is_noop() {
        let engine = engine(StaticHostCapabilities::all_supported().without_gpu());
        engine.initialize(None).await.unwrap();

        let calls = std::sync::atomic::AtomicUsize::new(0);
        engine
            .initialize(Some(&|_p: f64| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }))
            .await
            .unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(engine.active_device().await, Some(ComputeDevice::Cpu));
    }

    #[tokio::test]
    async fn test_analyze_dark_frame() {
        let engine = engine(StaticHostCapabilities::all_supported());
        engine.initialize(None).await.unwrap();

        let result = engine.analyze(&png_data_uri([5, 5, 5])).await.unwrap();
        assert_eq!(result.pipeline, Pipeline::Local);
        assert_eq!(result.model, LOCAL_MODEL_ID);
        assert_eq!(result.confidence, LOCAL_CONFIDENCE);
        assert!(result.reasoning.is_some());

        let stats = PixelStats::from_rgba(&RgbaImage::from_pixel(64, 48, Rgba([5, 5, 5, 255])));
        let family: Vec<String> = heuristic::caption_family(heuristic::BrightnessBucket::Dark)
            .iter()
            .map(|t| heuristic::fill_template(t, &stats))
            .collect();
        assert!(family.contains(&result.caption));
    }

    #[tokio::test]
    async fn test_same_frame_same_caption() {
        let engine = engine(StaticHostCapabilities::all_supported());
        engine.initialize(None).await.unwrap();

        let frame = png_data_uri([200, 120, 40]);
        let first = engine.analyze(&frame).await.unwrap();
        let second = engine.analyze(&frame).await.unwrap();
        assert_eq!(first.caption, second.caption);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_decode_error() {
        let engine = engine(StaticHostCapabilities::all_supported());
        engine.initialize(None).await.unwrap();

        let err = engine.analyze("data:image/png;base64,@@@").await.unwrap_err();
        assert!(matches!(err, Error::ImageDecode(_)));

        // Valid base64, not an image
        let err = engine.analyze(&STANDARD.encode(b"hello")).await.unwrap_err();
        assert!(matches!(err, Error::ImageDecode(_)));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let engine = engine(StaticHostCapabilities::all_supported());
        engine.initialize(None).await.unwrap();

        engine.cleanup().await;
        engine.cleanup().await;

        assert!(!engine.is_ready().await);
        assert_eq!(engine.active_device().await, None);
        assert!(engine.analyze(&png_data_uri([0, 0, 0])).await.is_err());
    }
}
