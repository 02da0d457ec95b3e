//! Application state
//!
//! Holds the configuration and every shared component, wired once at
//! process start

use crate::availability_cache::AvailabilityCache;
use crate::capability_detector::{CapabilityDetector, HostCapabilities, SystemHostCapabilities};
use crate::error::Result;
use crate::inference_manager::InferenceManager;
use crate::local_engine::LocalEngine;
use crate::models::{InferenceConfig, Pipeline};
use crate::performance_monitor::{PerformanceMonitor, DEFAULT_HISTORY_CAPACITY};
use crate::remote_client::{RemoteClient, DEFAULT_BASE_URL};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Local inference server base URL
    pub remote_base_url: String,
    /// Requested pipeline
    pub pipeline: Pipeline,
    /// Remote model identifier
    pub model: String,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Availability cache TTL
    pub availability_ttl: Duration,
    /// Retained latency samples
    pub latency_history: usize,
    /// Capture device that must exist for the environment to validate
    pub camera_device: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_base_url: DEFAULT_BASE_URL.to_string(),
            pipeline: Pipeline::Remote,
            model: "llava:7b".to_string(),
            max_output_tokens: None,
            temperature: None,
            availability_ttl: Duration::from_secs(30),
            latency_history: DEFAULT_HISTORY_CAPACITY,
            camera_device: None,
        }
    }
}

impl AppConfig {
    /// Load from environment variables; unparseable values keep their defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            remote_base_url: parse("REMOTE_BASE_URL").unwrap_or(defaults.remote_base_url),
            pipeline: parse_or("INFERENCE_PIPELINE", parse("INFERENCE_PIPELINE"), defaults.pipeline),
            model: parse("INFERENCE_MODEL").unwrap_or(defaults.model),
            max_output_tokens: parse("INFERENCE_MAX_TOKENS").and_then(|v| v.trim().parse().ok()),
            temperature: parse("INFERENCE_TEMPERATURE").and_then(|v| v.trim().parse().ok()),
            availability_ttl: parse("AVAILABILITY_TTL_SEC")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.availability_ttl),
            latency_history: parse_or("LATENCY_HISTORY", parse("LATENCY_HISTORY"), defaults.latency_history)
                .max(1),
            camera_device: parse("CAMERA_DEVICE"),
        }
    }

    /// Settings handed to the inference manager
    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            pipeline: self.pipeline,
            model: self.model.clone(),
            quantization_hint: None,
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key = key, value = %raw, "Ignoring invalid config value");
                default
            }
        },
        None => default,
    }
}

/// Application state shared across callers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Host capability provider
    pub host: Arc<dyn HostCapabilities>,
    /// RemoteClient (inference server adapter)
    pub remote: Arc<RemoteClient>,
    /// AvailabilityCache (remote reachability memo)
    pub availability: Arc<AvailabilityCache>,
    /// CapabilityDetector
    pub detector: Arc<CapabilityDetector>,
    /// LocalEngine (fallback analyzer)
    pub local_engine: Arc<LocalEngine>,
    /// PerformanceMonitor
    pub monitor: Arc<PerformanceMonitor>,
    /// InferenceManager
    pub inference: Arc<InferenceManager>,
}

impl AppState {
    /// Wire all components against the machine the process runs on
    pub fn new(config: AppConfig) -> Result<Self> {
        let mut host = SystemHostCapabilities::new();
        if let Some(device) = &config.camera_device {
            host = host.with_camera_device(device);
        }
        Self::with_host(config, Arc::new(host))
    }

    /// Wire all components against an injected capability provider
    pub fn with_host(config: AppConfig, host: Arc<dyn HostCapabilities>) -> Result<Self> {
        let inference_config = config.inference_config();
        inference_config.validate()?;

        let remote = Arc::new(RemoteClient::new(config.remote_base_url.clone())?);
        let availability = Arc::new(AvailabilityCache::with_ttl(
            remote.clone(),
            config.availability_ttl,
        ));
        let detector = Arc::new(CapabilityDetector::new(host.clone(), availability.clone()));
        let local_engine = Arc::new(LocalEngine::new(host.clone()));
        let monitor = Arc::new(PerformanceMonitor::with_capacity(config.latency_history));
        let inference = Arc::new(InferenceManager::new(
            inference_config,
            remote.clone(),
            local_engine.clone(),
            availability.clone(),
            monitor.clone(),
        ));

        Ok(Self {
            config,
            host,
            remote,
            availability,
            detector,
            local_engine,
            monitor,
            inference,
        })
    }
}
