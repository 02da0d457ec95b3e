//! RemoteClient against an in-process fake inference server

mod common;

use common::{FakeServer, StreamMode, CAPTION, REASONING};
use futures::StreamExt;
use scene_inference::remote_client::{RemoteClient, RemoteClientConfig, RemotePipeline};
use scene_inference::{Error, InferenceConfig, Pipeline};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn client() -> (Arc<FakeServer>, RemoteClient) {
    let server = FakeServer::new();
    let base_url = common::spawn(server.clone()).await;
    (server, RemoteClient::new(base_url).unwrap())
}

#[tokio::test]
async fn test_available_and_lists_models() {
    let (_server, client) = client().await;
    assert!(client.is_available().await);

    let all = client.list_models().await.unwrap();
    assert_eq!(all.len(), 3);

    let vision: Vec<String> = client
        .list_vision_models()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(vision, vec!["llava:7b", "moondream:latest"]);
}

#[tokio::test]
async fn test_analyze_strips_data_uri_and_runs_two_prompts() {
    let (server, client) = client().await;
    let config = InferenceConfig::new(Pipeline::Remote, "llava:7b")
        .with_temperature(0.2)
        .with_max_output_tokens(64);

    let result = client
        .analyze("data:image/jpeg;base64,AAAA", &config)
        .await
        .unwrap();

    assert_eq!(result.caption, CAPTION);
    assert_eq!(result.reasoning.as_deref(), Some(REASONING));
    assert_eq!(result.pipeline, Pipeline::Remote);
    assert_eq!(result.model, "llava:7b");
    assert_eq!(result.confidence, 0.85);

    let bodies = server.generate_bodies();
    assert_eq!(bodies.len(), 2);
    for body in &bodies {
        assert_eq!(body["images"][0], "AAAA");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
    }
    assert_ne!(bodies[0]["prompt"], bodies[1]["prompt"]);
}

#[tokio::test]
async fn test_analyze_unknown_model_is_model_not_found() {
    let (_server, client) = client().await;
    let config = InferenceConfig::new(Pipeline::Remote, "ghost:latest");

    match client.analyze("AAAA", &config).await {
        Err(Error::ModelNotFound(model)) => assert_eq!(model, "ghost:latest"),
        other => panic!("unexpected: {:?}", other.map(|r| r.caption)),
    }
}

#[tokio::test]
async fn test_analyze_server_error_is_request_failure() {
    let (server, client) = client().await;
    server
        .fail_generate
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let err = client
        .analyze("AAAA", &InferenceConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteRequestFailed(ref m) if m.contains("model runner crashed")));
    assert!(err.is_remote_failure());
}

#[tokio::test]
async fn test_stream_yields_fragments_in_order() {
    let (server, client) = client().await;
    let stream = client
        .analyze_stream("data:image/png;base64,AAAA", &InferenceConfig::default())
        .await
        .unwrap();

    let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
    assert_eq!(chunks, vec!["A ", "cat ", "sleeps."]);

    let bodies = server.generate_bodies();
    assert_eq!(bodies[0]["stream"], true);
    assert_eq!(bodies[0]["images"][0], "AAAA");
}

#[tokio::test]
async fn test_stream_ends_at_done() {
    let (server, client) = client().await;
    server.set_stream_mode(StreamMode::TrailingAfterDone);

    let chunks: Vec<String> = client
        .analyze_stream("AAAA", &InferenceConfig::default())
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    assert_eq!(chunks, vec!["Done."]);
}

#[tokio::test]
async fn test_stream_early_stop() {
    let (_server, client) = client().await;

    let stream = client
        .analyze_stream("AAAA", &InferenceConfig::default())
        .await
        .unwrap();
    drop(stream);

    let mut stream = client
        .analyze_stream("AAAA", &InferenceConfig::default())
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "A ");
    drop(stream);

    // Client stays usable after abandoned streams
    assert!(client.is_available().await);
}

#[tokio::test]
async fn test_stream_idle_timeout() {
    let server = FakeServer::new();
    server.set_stream_mode(StreamMode::Stall);
    let base_url = common::spawn(server.clone()).await;
    let client = RemoteClient::with_config(
        base_url,
        RemoteClientConfig {
            stream_idle_timeout: Duration::from_millis(200),
            ..Default::default()
        },
    )
    .unwrap();

    let mut stream = client
        .analyze_stream("AAAA", &InferenceConfig::default())
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "A ");
    assert!(matches!(
        stream.next().await,
        Some(Err(Error::RemoteRequestFailed(_)))
    ));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_pull_reports_percent() {
    let (_server, client) = client().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let status = client
        .pull_model("llava:7b", move |p| sink.lock().unwrap().push(p))
        .await
        .unwrap();

    assert_eq!(status, "success");
    assert_eq!(*seen.lock().unwrap(), vec![50.0, 100.0]);
}

#[tokio::test]
async fn test_pull_unknown_model() {
    let (_server, client) = client().await;
    let err = client.pull_model("ghost:latest", |_| {}).await.unwrap_err();
    assert!(matches!(err, Error::ModelNotFound(_)));
}

#[tokio::test]
async fn test_delete_model() {
    let (server, client) = client().await;

    client.delete_model("llava:7b").await.unwrap();
    assert_eq!(*server.deleted.lock().unwrap(), vec!["llava:7b".to_string()]);

    let err = client.delete_model("mistral:7b").await.unwrap_err();
    assert!(matches!(err, Error::ModelNotFound(ref m) if m == "mistral:7b"));
}

/// Accepts connections and never writes a response
async fn silent_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

fn short_timeouts() -> RemoteClientConfig {
    RemoteClientConfig {
        connect_timeout: Duration::from_millis(300),
        probe_timeout: Duration::from_millis(300),
        list_timeout: Duration::from_millis(300),
        generate_timeout: Duration::from_millis(300),
        stream_open_timeout: Duration::from_millis(300),
        stream_idle_timeout: Duration::from_millis(300),
    }
}

#[tokio::test]
async fn test_stream_open_is_bounded_when_server_never_answers() {
    let client = RemoteClient::with_config(silent_server().await, short_timeouts()).unwrap();

    let opened = tokio::time::timeout(
        Duration::from_secs(3),
        client.analyze_stream("AAAA", &InferenceConfig::default()),
    )
    .await
    .expect("stream open must be bounded");
    let err = opened.err().expect("silent server must not open a stream");
    assert!(matches!(err, Error::RemoteRequestFailed(_)));
    assert!(err.is_remote_failure());
}

#[tokio::test]
async fn test_pull_is_bounded_when_server_never_answers() {
    let client = RemoteClient::with_config(silent_server().await, short_timeouts()).unwrap();

    let pulled = tokio::time::timeout(Duration::from_secs(3), client.pull_model("llava:7b", |_| {}))
        .await
        .expect("pull must be bounded");
    assert!(matches!(pulled, Err(Error::RemoteRequestFailed(_))));
}
