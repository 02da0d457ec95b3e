//! RemoteClient - Local Inference Server Adapter
//!
//! ## Responsibilities
//!
//! - Availability probing (GET /api/tags)
//! - Model listing and vision-model filtering
//! - Caption + reasoning generation from a frame (POST /api/generate)
//! - Streaming generation (newline-delimited JSON)
//! - Model pull / delete
//!
//! Every request is bounded by an explicit timeout. Failures other than
//! availability probing are surfaced to the caller; fallback decisions
//! belong to the inference manager.

mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::models::{AnalysisResult, InferenceConfig, Pipeline};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default local inference server address
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Fixed confidence reported for remote results (the server exposes none)
pub const REMOTE_CONFIDENCE: f32 = 0.85;

const CAPTION_PROMPT: &str =
    "Describe this image in one short sentence. Focus on the main subject and setting.";
const REASONING_PROMPT: &str = "Explain in a few sentences what is happening in this scene: \
     the objects present, the lighting, the setting, and any activity you can infer.";

/// Lazy, single-pass sequence of generated text fragments
pub type TextStream = BoxStream<'static, Result<String>>;

/// Timeouts applied per request
#[derive(Debug, Clone)]
pub struct RemoteClientConfig {
    pub connect_timeout: Duration,
    /// isAvailable probe
    pub probe_timeout: Duration,
    /// Model listing / delete
    pub list_timeout: Duration,
    /// Non-streamed generation
    pub generate_timeout: Duration,
    /// Max wait for the response head of a streamed request (generate stream, pull)
    pub stream_open_timeout: Duration,
    /// Max wait for the next chunk of a streamed response
    pub stream_idle_timeout: Duration,
}

impl Default for RemoteClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(2),
            list_timeout: Duration::from_secs(10),
            generate_timeout: Duration::from_secs(120),
            stream_open_timeout: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Operations the inference manager needs from the remote pipeline
#[async_trait]
pub trait RemotePipeline: Send + Sync {
    /// Base address of the server, used by the loopback guard
    fn base_url(&self) -> &str;

    /// Reachability probe bounded by `timeout`. Never fails.
    async fn probe(&self, timeout: Duration) -> bool;

    /// Reachability probe with the default 2s bound. Never fails.
    async fn is_available(&self) -> bool {
        self.probe(Duration::from_secs(2)).await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    async fn list_vision_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self
            .list_models()
            .await?
            .into_iter()
            .filter(|m| is_vision_model(&m.name))
            .collect())
    }

    async fn analyze(&self, image_data: &str, config: &InferenceConfig) -> Result<AnalysisResult>;

    async fn analyze_stream(&self, image_data: &str, config: &InferenceConfig)
        -> Result<TextStream>;
}

/// Strip a data-URI header (`data:image/jpeg;base64,`) leaving the raw payload
pub fn strip_data_uri(image_data: &str) -> &str {
    if image_data.starts_with("data:") {
        if let Some(idx) = image_data.find(',') {
            return &image_data[idx + 1..];
        }
    }
    image_data
}

/// HTTP client for the local inference server
pub struct RemoteClient {
    client: reqwest::Client,
    base_url: String,
    config: RemoteClientConfig,
}

impl RemoteClient {
    /// Create new client with default timeouts
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(base_url, RemoteClientConfig::default())
    }

    /// Create new client with custom timeouts
    pub fn with_config(base_url: impl Into<String>, config: RemoteClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        })
    }

    pub fn config(&self) -> &RemoteClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn options(config: &InferenceConfig) -> GenerateOptions {
        GenerateOptions {
            temperature: config.temperature,
            num_predict: config.max_output_tokens,
        }
    }

    /// Send a streamed request and wait for a successful response head.
    ///
    /// Only the head is bounded here; the body is read under
    /// `stream_idle_timeout` so long generations are not cut off.
    async fn open_stream(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
        model: &str,
    ) -> Result<reqwest::Response> {
        let open = async {
            let resp = request
                .send()
                .await
                .map_err(|e| transport_error(context, e))?;
            check_status(resp, context, Some(model)).await
        };

        match tokio::time::timeout(self.config.stream_open_timeout, open).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    context = %context,
                    timeout = ?self.config.stream_open_timeout,
                    "No response head from inference server"
                );
                Err(Error::RemoteRequestFailed(format!(
                    "{}: no response within {:?}",
                    context, self.config.stream_open_timeout
                )))
            }
        }
    }

    /// Single non-streamed generation
    async fn generate(&self, model: &str, prompt: &str, image: &str, options: GenerateOptions) -> Result<String> {
        let body = GenerateRequest {
            model,
            prompt,
            images: vec![image],
            stream: false,
            options,
        };

        let resp = self
            .client
            .post(self.url("/api/generate"))
            .timeout(self.config.generate_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("generate", e))?;
        let resp = check_status(resp, "generate", Some(model)).await?;

        let result: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| Error::RemoteRequestFailed(format!("generate: invalid response body: {}", e)))?;

        if let Some(err) = result.error {
            return Err(Error::RemoteRequestFailed(format!("generate: {}", err)));
        }

        tracing::trace!(
            model = %model,
            eval_count = ?result.eval_count,
            total_duration_ns = ?result.total_duration,
            "Generation completed"
        );

        Ok(result.response.trim().to_string())
    }

    /// Download a model, reporting percent complete as progress lines arrive.
    ///
    /// Returns the last status reported by the server (`"success"` on a
    /// completed pull).
    pub async fn pull_model<F>(&self, model: &str, mut on_progress: F) -> Result<String>
    where
        F: FnMut(f64) + Send,
    {
        let body = ModelNameRequest {
            name: model,
            stream: Some(true),
        };

        let request = self.client.post(self.url("/api/pull")).json(&body);
        let resp = self.open_stream(request, "pull", model).await?;

        let mut body = resp.bytes_stream();
        let mut decoder = LineDecoder::new();
        let mut last_status = String::new();

        loop {
            let next = tokio::time::timeout(self.config.stream_idle_timeout, body.next()).await;
            let lines = match next {
                Err(_) => {
                    return Err(Error::RemoteRequestFailed(format!(
                        "pull: no progress for {:?}",
                        self.config.stream_idle_timeout
                    )))
                }
                Ok(Some(Ok(chunk))) => decoder.push(&chunk),
                Ok(Some(Err(e))) => return Err(transport_error("pull", e)),
                Ok(None) => {
                    let rest: Vec<String> = decoder.finish().into_iter().collect();
                    for line in rest {
                        if let Some(status) = handle_pull_line(&line, &mut on_progress)? {
                            last_status = status;
                        }
                    }
                    break;
                }
            };

            for line in lines {
                if let Some(status) = handle_pull_line(&line, &mut on_progress)? {
                    if status == "success" {
                        tracing::info!(model = %model, "Model pull completed");
                        return Ok(status);
                    }
                    last_status = status;
                }
            }
        }

        tracing::info!(model = %model, status = %last_status, "Model pull stream ended");
        Ok(last_status)
    }

    /// Remove an installed model
    pub async fn delete_model(&self, model: &str) -> Result<()> {
        let body = ModelNameRequest {
            name: model,
            stream: None,
        };

        let resp = self
            .client
            .delete(self.url("/api/delete"))
            .timeout(self.config.list_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("delete", e))?;
        check_status(resp, "delete", Some(model)).await?;

        tracing::info!(model = %model, "Model deleted");
        Ok(())
    }
}

#[async_trait]
impl RemotePipeline for RemoteClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn probe(&self, timeout: Duration) -> bool {
        match self
            .client
            .get(self.url("/api/tags"))
            .timeout(timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, base_url = %self.base_url, "Remote probe failed");
                false
            }
        }
    }

    async fn is_available(&self) -> bool {
        self.probe(self.config.probe_timeout).await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let resp = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.config.list_timeout)
            .send()
            .await
            .map_err(|e| transport_error("list models", e))?;
        let resp = check_status(resp, "list models", None).await?;

        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| Error::RemoteRequestFailed(format!("list models: invalid response body: {}", e)))?;
        Ok(tags.models)
    }

    async fn analyze(&self, image_data: &str, config: &InferenceConfig) -> Result<AnalysisResult> {
        let start = Instant::now();
        let image = strip_data_uri(image_data);
        let model = config.model.as_str();

        let caption = self
            .generate(model, CAPTION_PROMPT, image, Self::options(config))
            .await?;
        let reasoning = self
            .generate(model, REASONING_PROMPT, image, Self::options(config))
            .await?;

        let elapsed = start.elapsed().as_secs_f64();
        tracing::debug!(
            model = %model,
            processing_time_sec = elapsed,
            "Remote analysis completed"
        );

        Ok(AnalysisResult::new(
            caption,
            Some(reasoning).filter(|r| !r.is_empty()),
            REMOTE_CONFIDENCE,
            elapsed,
            Pipeline::Remote,
            config.model.clone(),
        ))
    }

    async fn analyze_stream(&self, image_data: &str, config: &InferenceConfig) -> Result<TextStream> {
        let image = strip_data_uri(image_data);
        let body = GenerateRequest {
            model: &config.model,
            prompt: REASONING_PROMPT,
            images: vec![image],
            stream: true,
            options: Self::options(config),
        };

        let request = self.client.post(self.url("/api/generate")).json(&body);
        let resp = self
            .open_stream(request, "generate stream", &config.model)
            .await?;

        let state = StreamState {
            body: resp.bytes_stream().boxed(),
            decoder: LineDecoder::new(),
            pending: VecDeque::new(),
            idle_timeout: self.config.stream_idle_timeout,
            finished: false,
        };

        Ok(stream::unfold(state, next_fragment).boxed())
    }
}

/// Parse one pull progress line. Malformed lines are skipped.
fn handle_pull_line<F>(line: &str, on_progress: &mut F) -> Result<Option<String>>
where
    F: FnMut(f64),
{
    let progress: PullProgress = match serde_json::from_str(line) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, line = %line, "Skipping malformed pull progress line");
            return Ok(None);
        }
    };

    if let Some(err) = progress.error {
        return Err(Error::RemoteRequestFailed(format!("pull: {}", err)));
    }

    if let Some(percent) = progress.percent() {
        tracing::trace!(percent = percent, "Pull progress");
        on_progress(percent);
    }

    Ok(progress.status)
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: LineDecoder,
    pending: VecDeque<String>,
    idle_timeout: Duration,
    finished: bool,
}

async fn next_fragment(mut st: StreamState) -> Option<(Result<String>, StreamState)> {
    loop {
        while let Some(line) = st.pending.pop_front() {
            let chunk: GenerateResponse = match serde_json::from_str(&line) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, line = %line, "Skipping malformed stream line");
                    continue;
                }
            };

            if let Some(err) = chunk.error {
                st.finished = true;
                st.pending.clear();
                return Some((Err(Error::RemoteRequestFailed(format!("generate stream: {}", err))), st));
            }

            if chunk.done {
                st.finished = true;
                st.pending.clear();
            }

            if !chunk.response.is_empty() {
                return Some((Ok(chunk.response), st));
            }
        }

        if st.finished {
            return None;
        }

        match tokio::time::timeout(st.idle_timeout, st.body.next()).await {
            Err(_) => {
                st.finished = true;
                let err = Error::RemoteRequestFailed(format!(
                    "generate stream: no data for {:?}",
                    st.idle_timeout
                ));
                return Some((Err(err), st));
            }
            Ok(None) => {
                st.finished = true;
                if let Some(rest) = st.decoder.finish() {
                    st.pending.push_back(rest);
                }
            }
            Ok(Some(Err(e))) => {
                st.finished = true;
                return Some((Err(transport_error("generate stream", e)), st));
            }
            Ok(Some(Ok(bytes))) => {
                let lines = st.decoder.push(&bytes);
                st.pending.extend(lines);
            }
        }
    }
}

/// Classify a reqwest transport failure
fn transport_error(context: &str, e: reqwest::Error) -> Error {
    if e.is_connect() {
        Error::RemoteServerUnreachable(format!("{}: {}", context, e))
    } else if e.is_timeout() {
        Error::RemoteRequestFailed(format!("{}: request timed out", context))
    } else {
        Error::RemoteRequestFailed(format!("{}: {}", context, e))
    }
}

/// Map a non-2xx response to an error, reading the server's message if any
async fn check_status(
    resp: reqwest::Response,
    context: &str,
    model: Option<&str>,
) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(|s| s.to_string()))
        .unwrap_or(body);

    if status == reqwest::StatusCode::NOT_FOUND {
        if let Some(model) = model {
            return Err(Error::ModelNotFound(model.to_string()));
        }
    }

    Err(Error::RemoteRequestFailed(format!(
        "{} failed: {} - {}",
        context, status, message
    )))
}
