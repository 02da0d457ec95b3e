//! CapabilityDetector types

use crate::error::{Error, Result};
use crate::models::Pipeline;
use serde::{Deserialize, Serialize};

/// Snapshot of what the host can do, computed fresh per detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemCapabilities {
    pub gpu_acceleration_available: bool,
    pub wasm_available: bool,
    pub remote_server_available: bool,
    pub recommended_pipeline: Pipeline,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_gb: Option<f64>,
}

/// Whether an issue prevents the core from running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Degrades performance only
    Warning,
    /// Core cannot run
    Blocking,
}

/// Missing host capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFeature {
    CameraAccess,
    DrawingSurface,
    AsyncRuntime,
    NetworkFetch,
    GpuAcceleration,
}

impl HostFeature {
    /// GPU absence is advisory; everything else is mandatory
    pub fn severity(&self) -> IssueSeverity {
        match self {
            HostFeature::GpuAcceleration => IssueSeverity::Warning,
            _ => IssueSeverity::Blocking,
        }
    }

    pub fn missing_message(&self) -> &'static str {
        match self {
            HostFeature::CameraAccess => "Camera access not supported",
            HostFeature::DrawingSurface => "Image drawing surface not supported",
            HostFeature::AsyncRuntime => "Async runtime not available",
            HostFeature::NetworkFetch => "Network fetch not supported",
            HostFeature::GpuAcceleration => {
                "GPU acceleration not available (local pipeline will run on CPU)"
            }
        }
    }
}

/// One entry of the compatibility report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentIssue {
    pub feature: HostFeature,
    pub severity: IssueSeverity,
    pub message: String,
}

impl EnvironmentIssue {
    pub fn missing(feature: HostFeature) -> Self {
        Self {
            feature,
            severity: feature.severity(),
            message: feature.missing_message().to_string(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == IssueSeverity::Blocking
    }
}

/// Result of validate_environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentReport {
    pub compatible: bool,
    pub issues: Vec<EnvironmentIssue>,
}

impl EnvironmentReport {
    /// `compatible` is derived from the severities, never from message text
    pub fn from_issues(issues: Vec<EnvironmentIssue>) -> Self {
        let compatible = !issues.iter().any(EnvironmentIssue::is_blocking);
        Self { compatible, issues }
    }

    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.message.clone()).collect()
    }

    /// Ok with the advisory issues when compatible.
    ///
    /// Missing camera access alone is `CameraUnavailable`. Any other
    /// blocking issue yields `UnsupportedEnvironment` listing every
    /// blocking message.
    pub fn into_result(self) -> Result<Vec<EnvironmentIssue>> {
        if self.compatible {
            return Ok(self.issues);
        }

        let blocking: Vec<EnvironmentIssue> = self
            .issues
            .into_iter()
            .filter(EnvironmentIssue::is_blocking)
            .collect();

        if let [only] = blocking.as_slice() {
            if only.feature == HostFeature::CameraAccess {
                tracing::warn!("Camera access unavailable on this host");
                return Err(Error::CameraUnavailable(only.message.clone()));
            }
        }

        Err(Error::UnsupportedEnvironment(
            blocking.into_iter().map(|i| i.message).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_issue_is_not_blocking() {
        let report =
            EnvironmentReport::from_issues(vec![EnvironmentIssue::missing(HostFeature::GpuAcceleration)]);
        assert!(report.compatible);
        assert_eq!(report.issues.len(), 1);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_blocking_issue_makes_incompatible() {
        let report = EnvironmentReport::from_issues(vec![
            EnvironmentIssue::missing(HostFeature::GpuAcceleration),
            EnvironmentIssue::missing(HostFeature::CameraAccess),
        ]);
        assert!(!report.compatible);
        match report.into_result() {
            Err(Error::CameraUnavailable(message)) => {
                assert_eq!(message, "Camera access not supported");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_several_blocking_issues_are_unsupported() {
        let report = EnvironmentReport::from_issues(vec![
            EnvironmentIssue::missing(HostFeature::CameraAccess),
            EnvironmentIssue::missing(HostFeature::GpuAcceleration),
            EnvironmentIssue::missing(HostFeature::NetworkFetch),
        ]);
        match report.into_result() {
            Err(Error::UnsupportedEnvironment(issues)) => {
                assert_eq!(
                    issues,
                    vec![
                        "Camera access not supported".to_string(),
                        "Network fetch not supported".to_string(),
                    ]
                );
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
