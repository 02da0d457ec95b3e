//! Wire types for the local inference server API

use serde::{Deserialize, Serialize};

/// Name fragments of models known to accept image input
pub const VISION_MODEL_PATTERNS: &[&str] = &[
    "llava",
    "bakllava",
    "moondream",
    "llama3.2-vision",
    "minicpm-v",
    "qwen2-vl",
    "qwen2.5vl",
    "granite3.2-vision",
    "cogvlm",
];

/// Case-insensitive match against [`VISION_MODEL_PATTERNS`]
pub fn is_vision_model(name: &str) -> bool {
    let lower = name.to_lowercase();
    VISION_MODEL_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Installed model entry (GET /api/tags)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// GET /api/tags response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// Sampling options forwarded to the server
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// POST /api/generate request body
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    /// Raw base64 payloads, no URI-scheme prefix
    pub images: Vec<&'a str>,
    pub stream: bool,
    pub options: GenerateOptions,
}

/// Non-streamed generate response, also the shape of each streamed line
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    /// Nanoseconds
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// POST /api/pull progress line
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PullProgress {
    /// completed / total * 100, when both are reported
    pub fn percent(&self) -> Option<f64> {
        match (self.completed, self.total) {
            (Some(completed), Some(total)) if total > 0 => {
                Some(completed as f64 / total as f64 * 100.0)
            }
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// Body for /api/pull and /api/delete
#[derive(Debug, Clone, Serialize)]
pub struct ModelNameRequest<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// Splits a byte stream into newline-delimited lines across chunk boundaries
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every complete non-empty line.
    /// Lines that are not valid UTF-8 are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(text) = decode_line(line) {
                lines.push(text);
            }
        }
        lines
    }

    /// Remaining unterminated line once the transport has ended
    pub fn finish(&mut self) -> Option<String> {
        decode_line(std::mem::take(&mut self.buf))
    }
}

fn decode_line(line: Vec<u8>) -> Option<String> {
    match String::from_utf8(line) {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        }
        Err(e) => {
            tracing::warn!(
                error = %e.utf8_error(),
                len = e.as_bytes().len(),
                "Skipping stream line with invalid UTF-8"
            );
            None
        }
    }
}
