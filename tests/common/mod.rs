//! In-process fake inference server for integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::stream;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const CAPTION: &str = "A cat sleeping on a sofa.";
pub const REASONING: &str = "A living room in daylight with a cat curled up on a gray sofa.";

/// How the fake answers a streamed generate request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Lines split across transport chunks, with one malformed line
    Split,
    /// Content after the `done` line
    TrailingAfterDone,
    /// One line, then the connection stays open without data
    Stall,
}

pub struct FakeServer {
    pub generate_bodies: Mutex<Vec<Value>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_generate: AtomicBool,
    pub stream_mode: Mutex<StreamMode>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            generate_bodies: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_generate: AtomicBool::new(false),
            stream_mode: Mutex::new(StreamMode::Split),
        })
    }

    pub fn set_stream_mode(&self, mode: StreamMode) {
        *self.stream_mode.lock().unwrap() = mode;
    }

    pub fn generate_bodies(&self) -> Vec<Value> {
        self.generate_bodies.lock().unwrap().clone()
    }
}

/// Serve the fake on an ephemeral loopback port, returning its base URL
pub async fn spawn(server: Arc<FakeServer>) -> String {
    let app = Router::new()
        .route("/api/tags", get(tags))
        .route("/api/generate", post(generate))
        .route("/api/pull", post(pull))
        .route("/api/delete", delete(delete_model))
        .with_state(server);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

async fn tags() -> Json<Value> {
    Json(json!({
        "models": [
            { "name": "llava:7b", "size": 4_700_000_000u64, "digest": "8dd30f6b0cb1", "modified_at": "2024-05-01T10:00:00Z" },
            { "name": "mistral:7b", "size": 4_100_000_000u64, "digest": "f974a74358d6", "modified_at": "2024-05-01T10:00:00Z" },
            { "name": "moondream:latest", "size": 1_700_000_000u64, "digest": "55fc3abd3867", "modified_at": "2024-05-01T10:00:00Z" }
        ]
    }))
}

async fn generate(State(server): State<Arc<FakeServer>>, Json(body): Json<Value>) -> Response {
    server.generate_bodies.lock().unwrap().push(body.clone());

    let model = body["model"].as_str().unwrap_or_default().to_string();
    if model == "ghost:latest" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("model '{}' not found", model) })),
        )
            .into_response();
    }
    if server.fail_generate.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "model runner crashed" })),
        )
            .into_response();
    }

    if body["stream"].as_bool().unwrap_or(false) {
        let mode = *server.stream_mode.lock().unwrap();
        return streamed(mode);
    }

    let prompt = body["prompt"].as_str().unwrap_or_default();
    let text = if prompt.contains("one short sentence") {
        CAPTION
    } else {
        REASONING
    };
    Json(json!({
        "model": model,
        "created_at": "2024-05-01T10:00:00Z",
        "response": format!(" {} ", text),
        "done": true,
        "total_duration": 1_200_000_000u64,
        "eval_count": 12
    }))
    .into_response()
}

fn streamed(mode: StreamMode) -> Response {
    let body = match mode {
        StreamMode::Split => Body::from_stream(stream::iter(vec![
            Ok::<_, std::io::Error>("{\"response\":\"A \"}\n{\"resp"),
            Ok("onse\":\"cat \"}\nnot json at all\n"),
            Ok("{\"response\":\"sleeps.\"}\n"),
            Ok("{\"response\":\"\",\"done\":true}\n"),
        ])),
        StreamMode::TrailingAfterDone => Body::from(
            "{\"response\":\"Done.\",\"done\":true}\n{\"response\":\"extra\"}\n",
        ),
        StreamMode::Stall => {
            use futures::StreamExt;
            Body::from_stream(
                stream::iter(vec![Ok::<_, std::io::Error>("{\"response\":\"A \"}\n")])
                    .chain(stream::pending()),
            )
        }
    };

    Response::builder()
        .header("content-type", "application/x-ndjson")
        .body(body)
        .unwrap()
}

async fn pull(Json(body): Json<Value>) -> Response {
    if body["name"] == "ghost:latest" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "pull model manifest: file does not exist" })),
        )
            .into_response();
    }

    let lines = concat!(
        "{\"status\":\"pulling manifest\"}\n",
        "{\"status\":\"downloading\",\"digest\":\"sha256:abc\",\"total\":100,\"completed\":50}\n",
        "{\"status\":\"downloading\",\"digest\":\"sha256:abc\",\"total\":100,\"completed\":100}\n",
        "{\"status\":\"verifying sha256 digest\"}\n",
        "{\"status\":\"success\"}\n",
    );
    Response::builder()
        .header("content-type", "application/x-ndjson")
        .body(Body::from(lines))
        .unwrap()
}

async fn delete_model(State(server): State<Arc<FakeServer>>, Json(body): Json<Value>) -> Response {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    if name != "llava:7b" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("model '{}' not found", name) })),
        )
            .into_response();
    }
    server.deleted.lock().unwrap().push(name);
    StatusCode::OK.into_response()
}

/// PNG frame as a data URI
pub fn png_data_uri(width: u32, height: u32, rgb: [u8; 3]) -> String {
    let frame = RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(frame)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}
