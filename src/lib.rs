//! Scene Inference Library
//!
//! Dual-pipeline scene description: frames are described either by a local
//! inference server over HTTP or by an in-process fallback engine.
//!
//! ## Architecture (6 Components)
//!
//! 1. CapabilityDetector - GPU / engine / server probing, pipeline recommendation
//! 2. AvailabilityCache - TTL memo of remote server reachability
//! 3. RemoteClient - Inference server adapter (generate, stream, pull, delete)
//! 4. LocalEngine - Heuristic fallback analyzer behind `LocalAnalyzer`
//! 5. InferenceManager - Pipeline selection, dispatch and sticky fallback
//! 6. PerformanceMonitor - Latency / memory telemetry and recommendations
//!
//! ## Design Principles
//!
//! - Explicit context: every component receives its collaborators, no globals
//! - Probes never fail: unreachable means "unavailable", not an error
//! - Fallback lives in one place: only the InferenceManager decides

pub mod availability_cache;
pub mod capability_detector;
pub mod error;
pub mod inference_manager;
pub mod local_engine;
pub mod models;
pub mod performance_monitor;
pub mod remote_client;
pub mod state;

pub use error::{Error, Result};
pub use models::{AnalysisResult, InferenceConfig, Pipeline};
pub use state::{AppConfig, AppState};
