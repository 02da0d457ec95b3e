//! PerformanceMonitor - Inference Telemetry
//!
//! ## Responsibilities
//!
//! - Latency history in a bounded ring buffer (oldest evicted first)
//! - Current / peak memory tracking
//! - Health verdict and tuning recommendations from fixed thresholds

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default number of retained latency samples
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Default target for is_performance_acceptable, seconds
pub const DEFAULT_TARGET_LATENCY_SEC: f64 = 3.0;

/// Memory reading at or above this is never acceptable
pub const MEMORY_CEILING_GB: f64 = 2.5;

/// Average latency above this triggers latency recommendations
pub const SLOW_LATENCY_SEC: f64 = 5.0;

/// Memory reading above this triggers memory recommendations
pub const HIGH_MEMORY_GB: f64 = 2.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Running metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Most recent latency, seconds
    pub inference_latency: f64,
    /// Mean of retained latencies, seconds
    pub average_latency: f64,
    /// 1 / average_latency, 0 without samples
    pub fps: f64,
    pub memory_usage_gb: f64,
    /// High-water mark since the last reset
    pub peak_memory_gb: f64,
    pub gpu_active: bool,
    pub sample_count: usize,
}

/// Aggregate view for the UI layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub average_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub sample_count: usize,
    pub memory_usage_gb: f64,
    pub peak_memory_gb: f64,
    pub gpu_active: bool,
}

struct MonitorState {
    latencies: VecDeque<f64>,
    capacity: usize,
    metrics: PerformanceMetrics,
}

impl MonitorState {
    fn new(capacity: usize) -> Self {
        Self {
            latencies: VecDeque::with_capacity(capacity),
            capacity,
            metrics: PerformanceMetrics::default(),
        }
    }

    fn push(&mut self, seconds: f64) {
        if self.latencies.len() >= self.capacity {
            self.latencies.pop_front();
        }
        self.latencies.push_back(seconds);

        let average = self.latencies.iter().sum::<f64>() / self.latencies.len() as f64;
        self.metrics.inference_latency = seconds;
        self.metrics.average_latency = average;
        self.metrics.fps = if average > 0.0 { 1.0 / average } else { 0.0 };
        self.metrics.sample_count = self.latencies.len();
    }

    fn set_memory(&mut self, gb: f64) {
        self.metrics.memory_usage_gb = gb;
        if gb > self.metrics.peak_memory_gb {
            self.metrics.peak_memory_gb = gb;
        }
    }

    fn summary(&self) -> PerformanceSummary {
        let (min, max) = if self.latencies.is_empty() {
            (0.0, 0.0)
        } else {
            self.latencies
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(*v), hi.max(*v))
                })
        };

        PerformanceSummary {
            average_latency: self.metrics.average_latency,
            min_latency: min,
            max_latency: max,
            sample_count: self.latencies.len(),
            memory_usage_gb: self.metrics.memory_usage_gb,
            peak_memory_gb: self.metrics.peak_memory_gb,
            gpu_active: self.metrics.gpu_active,
        }
    }
}

/// PerformanceMonitor service
pub struct PerformanceMonitor {
    state: RwLock<MonitorState>,
}

impl PerformanceMonitor {
    /// Create new PerformanceMonitor with the default history size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(MonitorState::new(capacity.max(1))),
        }
    }

    /// Record one inference duration in seconds. Negative or non-finite
    /// values are ignored.
    pub async fn record_latency(&self, seconds: f64) {
        if !seconds.is_finite() || seconds < 0.0 {
            tracing::warn!(seconds = seconds, "Ignoring invalid latency sample");
            return;
        }

        let mut state = self.state.write().await;
        state.push(seconds);
        tracing::trace!(
            latency_ms = (seconds * 1000.0) as u64,
            average_ms = (state.metrics.average_latency * 1000.0) as u64,
            samples = state.metrics.sample_count,
            "Latency recorded"
        );
    }

    /// Record a memory reading in GB
    pub async fn record_memory(&self, gb: f64) {
        if !gb.is_finite() || gb < 0.0 {
            return;
        }
        self.state.write().await.set_memory(gb);
    }

    /// Read this process's resident memory and record it
    pub async fn sample_memory(&self) -> Result<f64> {
        let pid = sysinfo::get_current_pid().map_err(|e| Error::Internal(e.to_string()))?;
        let mut sys = sysinfo::System::new();
        sys.refresh_process(pid);
        let bytes = sys
            .process(pid)
            .map(|p| p.memory())
            .ok_or_else(|| Error::Internal("current process not found".to_string()))?;

        let gb = bytes as f64 / BYTES_PER_GB;
        self.record_memory(gb).await;
        self.check_memory().await?;
        Ok(gb)
    }

    /// Advisory memory-pressure check against the current reading.
    ///
    /// Fails with `OutOfMemory` at or above [`MEMORY_CEILING_GB`]. The
    /// reading stays recorded either way.
    pub async fn check_memory(&self) -> Result<()> {
        let gb = self.state.read().await.metrics.memory_usage_gb;
        if gb >= MEMORY_CEILING_GB {
            tracing::warn!(memory_gb = gb, ceiling_gb = MEMORY_CEILING_GB, "Memory ceiling reached");
            return Err(Error::OutOfMemory(format!(
                "{:.2} GB in use, ceiling is {:.1} GB",
                gb, MEMORY_CEILING_GB
            )));
        }
        Ok(())
    }

    pub async fn set_gpu_active(&self, active: bool) {
        self.state.write().await.metrics.gpu_active = active;
    }

    pub async fn metrics(&self) -> PerformanceMetrics {
        self.state.read().await.metrics.clone()
    }

    pub async fn summary(&self) -> PerformanceSummary {
        self.state.read().await.summary()
    }

    /// Retained samples, oldest first
    pub async fn latency_history(&self) -> Vec<f64> {
        self.state.read().await.latencies.iter().copied().collect()
    }

    /// True iff average latency <= target and every memory reading since
    /// the last reset stayed under the ceiling
    pub async fn is_performance_acceptable(&self, target_latency_sec: f64) -> bool {
        let state = self.state.read().await;
        state.metrics.average_latency <= target_latency_sec
            && state.metrics.peak_memory_gb < MEMORY_CEILING_GB
    }

    /// Actionable hints, latency first then memory
    pub async fn recommendations(&self) -> Vec<String> {
        let metrics = self.metrics().await;
        let mut hints = Vec::new();

        if metrics.average_latency > SLOW_LATENCY_SEC {
            hints.push("Reduce the capture resolution to speed up inference".to_string());
            hints.push("Switch to a smaller or quantized model".to_string());
            if !metrics.gpu_active {
                hints.push("Enable GPU acceleration if the host supports it".to_string());
            }
        }

        if metrics.memory_usage_gb > HIGH_MEMORY_GB {
            hints.push("Reduce the frame buffer size".to_string());
            hints.push("Close other memory-heavy applications".to_string());
        }

        hints
    }

    /// Clear all samples and metrics
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let capacity = state.capacity;
        *state = MonitorState::new(capacity);
        tracing::debug!("Performance metrics reset");
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
