//! InferenceManager - Pipeline Selection and Fallback
//!
//! ## Responsibilities
//!
//! - Choose the working pipeline at initialization (remote downgrades to
//!   local when the server is unreachable)
//! - Dispatch analysis to the working pipeline
//! - Sticky fallback: a failed remote analysis is retried locally and the
//!   manager stays on local afterwards
//! - Explicit pipeline switching
//! - Latency recording into the performance monitor
//!
//! ## State machine
//!
//! ```text
//! Uninitialized --initialize()--> Initializing --> Ready(remote | local)
//! Ready(remote) --remote failure--> Ready(local)
//! Ready(a)      --switch_pipeline(b)--> Ready(b)
//! ```

mod types;

pub use types::*;

use crate::availability_cache::AvailabilityCache;
use crate::error::{Error, Result};
use crate::local_engine::LocalAnalyzer;
use crate::models::{AnalysisResult, InferenceConfig, Pipeline};
use crate::performance_monitor::PerformanceMonitor;
use crate::remote_client::{RemotePipeline, TextStream};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// InferenceManager service
pub struct InferenceManager {
    remote: Arc<dyn RemotePipeline>,
    local: Arc<dyn LocalAnalyzer>,
    availability: Arc<AvailabilityCache>,
    monitor: Arc<PerformanceMonitor>,
    /// Private copy of the caller's settings
    config: RwLock<InferenceConfig>,
    state: RwLock<ManagerState>,
    transitions: RwLock<VecDeque<PipelineTransition>>,
    /// Serializes initialize / switch_pipeline / cleanup
    lifecycle: Mutex<()>,
}

impl InferenceManager {
    /// Create new InferenceManager
    pub fn new(
        config: InferenceConfig,
        remote: Arc<dyn RemotePipeline>,
        local: Arc<dyn LocalAnalyzer>,
        availability: Arc<AvailabilityCache>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            remote,
            local,
            availability,
            monitor,
            config: RwLock::new(config),
            state: RwLock::new(ManagerState::Uninitialized),
            transitions: RwLock::new(VecDeque::with_capacity(TRANSITION_HISTORY)),
            lifecycle: Mutex::new(()),
        }
    }

    /// Select the working pipeline and make it usable.
    ///
    /// A configured remote pipeline whose server is unreachable is
    /// downgraded to local for the rest of the session.
    pub async fn initialize(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let config = self.config.read().await.clone();
        config.validate()?;

        let previous = self.set_state(ManagerState::Initializing).await.pipeline();

        let mut working = config.pipeline;
        let mut reason = TransitionReason::Initialized;

        if working == Pipeline::Remote && !self.availability.check().await {
            tracing::warn!(
                base_url = %self.remote.base_url(),
                "Remote server unavailable, using local pipeline"
            );
            working = Pipeline::Local;
            reason = TransitionReason::RemoteUnavailable;
        }

        if working == Pipeline::Local {
            if let Err(e) = self.local.initialize(None).await {
                self.set_state(ManagerState::Uninitialized).await;
                return Err(e);
            }
        }

        self.set_state(ManagerState::Ready(working)).await;
        self.record_transition(previous, working, reason).await;

        tracing::info!(
            pipeline = %working,
            model = %config.model,
            "Inference manager ready"
        );
        Ok(())
    }

    /// Analyze one frame on the working pipeline.
    ///
    /// A remote failure is retried on the local engine and the working
    /// pipeline switches to local for all later calls.
    pub async fn analyze(&self, image_data: &str) -> Result<AnalysisResult> {
        let pipeline = self.ready_pipeline().await?;
        let start = Instant::now();

        let result = match pipeline {
            Pipeline::Local => self.local.analyze(image_data).await?,
            Pipeline::Remote => {
                let config = self.config.read().await.clone();
                match self.remote.analyze(image_data, &config).await {
                    Ok(result) => result,
                    Err(e) if e.is_remote_failure() => {
                        tracing::warn!(error = %e, "Remote analysis failed, falling back to local engine");
                        self.fall_back_to_local().await?;
                        self.local.analyze(image_data).await?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        self.monitor.record_latency(elapsed).await;

        tracing::debug!(
            pipeline = %result.pipeline,
            latency_ms = (elapsed * 1000.0) as u64,
            "Frame analyzed"
        );
        Ok(result)
    }

    /// Stream the description of a frame.
    ///
    /// On the local pipeline the caption arrives as a single chunk. Failing
    /// to open the remote stream falls back like [`Self::analyze`].
    pub async fn analyze_stream(&self, image_data: &str) -> Result<TextStream> {
        let pipeline = self.ready_pipeline().await?;

        if pipeline == Pipeline::Remote {
            let config = self.config.read().await.clone();
            match self.remote.analyze_stream(image_data, &config).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_remote_failure() => {
                    tracing::warn!(error = %e, "Remote stream failed, falling back to local engine");
                    self.fall_back_to_local().await?;
                }
                Err(e) => return Err(e),
            }
        }

        let result = self.local.analyze(image_data).await?;
        Ok(stream::iter(vec![Ok(result.caption)]).boxed())
    }

    /// Caller-driven pipeline change.
    ///
    /// Switching to remote re-validates availability and fails with
    /// `RemoteServerUnreachable` instead of falling back.
    pub async fn switch_pipeline(&self, target: Pipeline) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state.read().await.pipeline();

        if current == Some(target) {
            tracing::debug!(pipeline = %target, "Already on requested pipeline");
            return Ok(());
        }

        match target {
            Pipeline::Remote => {
                self.availability.invalidate().await;
                if !self.availability.check().await {
                    return Err(Error::RemoteServerUnreachable(
                        self.remote.base_url().to_string(),
                    ));
                }
            }
            Pipeline::Local => self.local.initialize(None).await?,
        }

        self.config.write().await.pipeline = target;
        self.set_state(ManagerState::Ready(target)).await;
        self.record_transition(current, target, TransitionReason::Switched).await;

        tracing::info!(from = ?current, to = %target, "Pipeline switched");
        Ok(())
    }

    /// Working pipeline, None before initialization
    pub async fn current_pipeline(&self) -> Option<Pipeline> {
        self.state.read().await.pipeline()
    }

    pub async fn state(&self) -> ManagerState {
        *self.state.read().await
    }

    pub async fn config(&self) -> InferenceConfig {
        self.config.read().await.clone()
    }

    /// Replace the settings. A pipeline change takes effect on the next
    /// initialize().
    pub async fn update_config(&self, config: InferenceConfig) -> Result<()> {
        config.validate()?;
        tracing::debug!(pipeline = %config.pipeline, model = %config.model, "Inference config updated");
        *self.config.write().await = config;
        Ok(())
    }

    /// Availability of both pipelines; the working pipeline is unchanged
    pub async fn check_pipeline_availability(&self) -> PipelineAvailability {
        PipelineAvailability {
            remote: self.availability.check().await,
            local: true,
        }
    }

    /// Vision-capable remote models when the server is reachable, otherwise
    /// the local engine's model
    pub async fn available_models(&self) -> Vec<String> {
        if self.availability.check().await {
            match self.remote.list_vision_models().await {
                Ok(models) => return models.into_iter().map(|m| m.name).collect(),
                Err(e) => tracing::warn!(error = %e, "Failed to list remote models"),
            }
        }
        vec![self.local.model_id().to_string()]
    }

    /// Transition log, oldest first
    pub async fn transitions(&self) -> Vec<PipelineTransition> {
        self.transitions.read().await.iter().cloned().collect()
    }

    /// Release the local engine. Safe to call repeatedly; the manager must
    /// be initialized again before the next analysis.
    pub async fn cleanup(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.local.cleanup().await;
        let previous = self.set_state(ManagerState::Uninitialized).await;
        if previous != ManagerState::Uninitialized {
            tracing::info!("Inference manager cleaned up");
        }
    }

    async fn ready_pipeline(&self) -> Result<Pipeline> {
        self.state.read().await.pipeline().ok_or(Error::ManagerNotReady)
    }

    /// Sticky downgrade after a remote failure. The manager stays on remote
    /// if the local engine cannot be loaded.
    async fn fall_back_to_local(&self) -> Result<()> {
        if let Err(e) = self.local.initialize(None).await {
            tracing::error!(error = %e, "Local engine failed to load, staying on remote pipeline");
            return Err(e);
        }

        self.set_state(ManagerState::Ready(Pipeline::Local)).await;
        self.record_transition(
            Some(Pipeline::Remote),
            Pipeline::Local,
            TransitionReason::RemoteFailure,
        )
        .await;
        Ok(())
    }

    /// Returns the replaced state
    async fn set_state(&self, next: ManagerState) -> ManagerState {
        let mut state = self.state.write().await;
        std::mem::replace(&mut *state, next)
    }

    async fn record_transition(&self, from: Option<Pipeline>, to: Pipeline, reason: TransitionReason) {
        let mut log = self.transitions.write().await;
        if log.len() >= TRANSITION_HISTORY {
            log.pop_front();
        }
        log.push_back(PipelineTransition {
            from,
            to,
            reason,
            at: Utc::now(),
        });

        tracing::info!(from = ?from, to = %to, reason = ?reason, "Pipeline transition");
    }
}
