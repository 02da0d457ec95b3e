//! InferenceManager types

use crate::models::Pipeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of retained pipeline transitions
pub const TRANSITION_HISTORY: usize = 16;

/// Manager lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "pipeline", rename_all = "lowercase")]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    /// Ready with the working pipeline
    Ready(Pipeline),
}

impl ManagerState {
    pub fn pipeline(&self) -> Option<Pipeline> {
        match self {
            ManagerState::Ready(p) => Some(*p),
            _ => None,
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Uninitialized => write!(f, "uninitialized"),
            ManagerState::Initializing => write!(f, "initializing"),
            ManagerState::Ready(p) => write!(f, "ready({})", p),
        }
    }
}

/// Why the working pipeline changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// initialize() selected the configured pipeline
    Initialized,
    /// initialize() found the remote server unreachable
    RemoteUnavailable,
    /// A remote analysis failed and was retried locally
    RemoteFailure,
    /// Caller-driven switch_pipeline()
    Switched,
}

/// One entry of the transition log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTransition {
    /// None when leaving a not-ready state
    pub from: Option<Pipeline>,
    pub to: Pipeline,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
}

/// Result of check_pipeline_availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineAvailability {
    pub remote: bool,
    /// Always true
    pub local: bool,
}
