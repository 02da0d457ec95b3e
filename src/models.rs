//! Shared models and types
//!
//! This module contains types shared across the pipelines and the
//! inference manager to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Analysis backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    /// Local inference server reached over HTTP
    Remote,
    /// In-process fallback engine
    Local,
}

impl Pipeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::Remote => "remote",
            Pipeline::Local => "local",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "ollama" => Ok(Pipeline::Remote),
            "local" | "browser" => Ok(Pipeline::Local),
            other => Err(Error::Config(format!("unknown pipeline: {}", other))),
        }
    }
}

/// Scene description produced by either pipeline
///
/// Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub caption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// 0.0 - 1.0
    pub confidence: f32,
    /// Seconds
    pub processing_time: f64,
    pub pipeline: Pipeline,
    pub model: String,
}

impl AnalysisResult {
    /// Build a result stamped with a fresh id and the current time.
    ///
    /// `confidence` is clamped into [0, 1] and `processing_time` to >= 0.
    pub fn new(
        caption: String,
        reasoning: Option<String>,
        confidence: f32,
        processing_time: f64,
        pipeline: Pipeline,
        model: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            caption,
            reasoning,
            confidence: confidence.clamp(0.0, 1.0),
            processing_time: processing_time.max(0.0),
            pipeline,
            model,
        }
    }
}

/// Caller-owned inference settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub pipeline: Pipeline,
    pub model: String,
    /// Informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// 0.0 - 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            pipeline: Pipeline::Remote,
            model: "llava:7b".to_string(),
            quantization_hint: None,
            max_output_tokens: None,
            temperature: None,
        }
    }
}

impl InferenceConfig {
    pub fn new(pipeline: Pipeline, model: impl Into<String>) -> Self {
        Self {
            pipeline,
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_quantization_hint(mut self, hint: impl Into<String>) -> Self {
        self.quantization_hint = Some(hint.into());
        self
    }

    /// Reject values outside their documented ranges
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".to_string()));
        }
        if self.max_output_tokens == Some(0) {
            return Err(Error::Config("max_output_tokens must be positive".to_string()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::Config(format!(
                    "temperature must be within [0, 1], got {}",
                    t
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_parse() {
        assert_eq!("remote".parse::<Pipeline>().unwrap(), Pipeline::Remote);
        assert_eq!(" Local ".parse::<Pipeline>().unwrap(), Pipeline::Local);
        assert!("cloud".parse::<Pipeline>().is_err());
    }

    #[test]
    fn test_result_clamps_ranges() {
        let result = AnalysisResult::new(
            "A room".to_string(),
            None,
            1.7,
            -0.2,
            Pipeline::Local,
            "local-heuristic-v1".to_string(),
        );
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.processing_time, 0.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(InferenceConfig::default().validate().is_ok());
        assert!(InferenceConfig::default().with_temperature(1.5).validate().is_err());
        assert!(InferenceConfig::default().with_max_output_tokens(0).validate().is_err());
        assert!(InferenceConfig::new(Pipeline::Local, "").validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = InferenceConfig::new(Pipeline::Local, "moondream").with_temperature(0.2);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"pipeline\":\"local\""));
        assert!(json.contains("\"temperature\":0.2"));
        assert!(!json.contains("max_output_tokens"));
    }
}
