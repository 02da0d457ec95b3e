//! CapabilityDetector - Host Capability Probing
//!
//! ## Responsibilities
//!
//! - Probe GPU acceleration, in-process engine support and remote server
//!   reachability concurrently
//! - Recommend a pipeline (remote iff the server is reachable)
//! - Validate mandatory host capabilities with a structured issue list
//!
//! Host probing goes through the [`HostCapabilities`] trait so tests can
//! inject fixed flags. Every probe degrades to "unavailable" on failure;
//! detection as a whole never fails.

mod types;

pub use types::*;

use crate::availability_cache::AvailabilityCache;
use crate::models::Pipeline;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Host capability provider
pub trait HostCapabilities: Send + Sync {
    /// Description of a usable GPU adapter, if any
    fn gpu_adapter(&self) -> Option<String>;
    /// In-process inference runtime support
    fn wasm_supported(&self) -> bool;
    fn camera_access(&self) -> bool;
    fn drawing_surface(&self) -> bool;
    fn async_runtime(&self) -> bool;
    fn network_fetch(&self) -> bool;
    fn memory_limit_gb(&self) -> Option<f64>;
}

/// Probes the machine the process runs on
#[derive(Debug, Clone, Default)]
pub struct SystemHostCapabilities {
    /// Capture device that must be present, e.g. `/dev/video0`
    camera_device: Option<PathBuf>,
}

impl SystemHostCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a specific capture device. Without one, camera access only
    /// depends on the platform capture API, which frames reach this core
    /// through as data URIs.
    pub fn with_camera_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.camera_device = Some(device.into());
        self
    }
}

impl HostCapabilities for SystemHostCapabilities {
    fn gpu_adapter(&self) -> Option<String> {
        if std::env::var("SCENE_DISABLE_GPU").is_ok() {
            return None;
        }

        #[cfg(target_os = "macos")]
        {
            return Some("Apple Metal".to_string());
        }

        #[cfg(not(target_os = "macos"))]
        {
            if Path::new("/dev/nvidia0").exists() {
                let version = std::fs::read_to_string("/proc/driver/nvidia/version")
                    .ok()
                    .and_then(|v| v.lines().next().map(|l| l.trim().to_string()));
                return Some(version.unwrap_or_else(|| "NVIDIA GPU".to_string()));
            }
            if Path::new("/dev/dri/renderD128").exists() {
                return Some("DRM render node (/dev/dri/renderD128)".to_string());
            }
            None
        }
    }

    fn wasm_supported(&self) -> bool {
        // The local engine runs natively in-process
        true
    }

    fn camera_access(&self) -> bool {
        match &self.camera_device {
            Some(device) => {
                let present = device.exists();
                if !present {
                    tracing::debug!(device = %device.display(), "Configured camera device missing");
                }
                present
            }
            None => true,
        }
    }

    fn drawing_surface(&self) -> bool {
        true
    }

    fn async_runtime(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    fn network_fetch(&self) -> bool {
        true
    }

    fn memory_limit_gb(&self) -> Option<f64> {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            None
        } else {
            Some(total as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }
}

/// Fixed capability flags, for tests and headless deployments
#[derive(Debug, Clone)]
pub struct StaticHostCapabilities {
    pub gpu: Option<String>,
    pub wasm: bool,
    pub camera: bool,
    pub drawing_surface: bool,
    pub async_runtime: bool,
    pub network_fetch: bool,
    pub memory_limit_gb: Option<f64>,
}

impl StaticHostCapabilities {
    /// Everything present, including a GPU
    pub fn all_supported() -> Self {
        Self {
            gpu: Some("Test GPU".to_string()),
            wasm: true,
            camera: true,
            drawing_surface: true,
            async_runtime: true,
            network_fetch: true,
            memory_limit_gb: Some(8.0),
        }
    }

    pub fn without_gpu(mut self) -> Self {
        self.gpu = None;
        self
    }

    pub fn without_camera(mut self) -> Self {
        self.camera = false;
        self
    }
}

impl HostCapabilities for StaticHostCapabilities {
    fn gpu_adapter(&self) -> Option<String> {
        self.gpu.clone()
    }

    fn wasm_supported(&self) -> bool {
        self.wasm
    }

    fn camera_access(&self) -> bool {
        self.camera
    }

    fn drawing_surface(&self) -> bool {
        self.drawing_surface
    }

    fn async_runtime(&self) -> bool {
        self.async_runtime
    }

    fn network_fetch(&self) -> bool {
        self.network_fetch
    }

    fn memory_limit_gb(&self) -> Option<f64> {
        self.memory_limit_gb
    }
}

/// CapabilityDetector service
pub struct CapabilityDetector {
    host: Arc<dyn HostCapabilities>,
    availability: Arc<AvailabilityCache>,
}

impl CapabilityDetector {
    /// Create new CapabilityDetector
    pub fn new(host: Arc<dyn HostCapabilities>, availability: Arc<AvailabilityCache>) -> Self {
        Self { host, availability }
    }

    pub fn host(&self) -> Arc<dyn HostCapabilities> {
        self.host.clone()
    }

    /// Run the three probes concurrently and recommend a pipeline
    pub async fn detect_capabilities(&self) -> SystemCapabilities {
        let host = self.host.as_ref();

        let (gpu, wasm, remote, memory) = tokio::join!(
            guarded_probe(|| host.gpu_adapter(), None),
            guarded_probe(|| host.wasm_supported(), false),
            self.availability.check(),
            guarded_probe(|| host.memory_limit_gb(), None),
        );

        let recommended_pipeline = if remote {
            Pipeline::Remote
        } else {
            Pipeline::Local
        };

        let capabilities = SystemCapabilities {
            gpu_acceleration_available: gpu.is_some(),
            wasm_available: wasm,
            remote_server_available: remote,
            recommended_pipeline,
            gpu_description: gpu,
            memory_limit_gb: memory,
        };

        tracing::info!(
            gpu = capabilities.gpu_acceleration_available,
            wasm = capabilities.wasm_available,
            remote = capabilities.remote_server_available,
            recommended = %capabilities.recommended_pipeline,
            "Capabilities detected"
        );

        capabilities
    }

    /// Check mandatory host capabilities.
    ///
    /// GPU absence is reported as a warning and does not make the host
    /// incompatible.
    pub fn validate_environment(&self) -> EnvironmentReport {
        let checks = [
            (HostFeature::CameraAccess, self.host.camera_access()),
            (HostFeature::DrawingSurface, self.host.drawing_surface()),
            (HostFeature::AsyncRuntime, self.host.async_runtime()),
            (HostFeature::NetworkFetch, self.host.network_fetch()),
            (HostFeature::GpuAcceleration, self.host.gpu_adapter().is_some()),
        ];

        let issues: Vec<EnvironmentIssue> = checks
            .iter()
            .filter(|(_, present)| !present)
            .map(|(feature, _)| EnvironmentIssue::missing(*feature))
            .collect();

        let report = EnvironmentReport::from_issues(issues);
        if !report.compatible {
            tracing::warn!(issues = ?report.messages(), "Environment incompatible");
        }
        report
    }
}

/// Run a host probe; a panicking probe reports `fallback`.
async fn guarded_probe<T, F>(probe: F, fallback: T) -> T
where
    F: FnOnce() -> T,
{
    match std::panic::catch_unwind(AssertUnwindSafe(probe)) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("Capability probe panicked, reporting unavailable");
            fallback
        }
    }
}
