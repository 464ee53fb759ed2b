//! End-to-end execution tests for the event-stream strategy
//!
//! The mock engine serves a real WebSocket at /ws and replays a scripted
//! sequence of status frames after the prompt is submitted. The waiter
//! connects before submitting, so scripted frames are always observable.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Json, Response},
    routing::{any, get, post},
    Router,
};
use comfygate::blob::BlobClient;
use comfygate::config::EngineConfig;
use comfygate::engine::client::EngineClient;
use comfygate::runtime::executor::WorkflowExecutor;
use comfygate::runtime::ws_waiter::WsWaiter;
use comfygate::ExecStatus;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Frames the mock engine pushes once a prompt has been submitted
#[derive(Clone, Default)]
struct MockEngine {
    prompts: Arc<Mutex<Vec<Value>>>,
    script: Arc<Mutex<Vec<Value>>>,
    /// Close the stream right away instead of playing the script
    drop_stream: Arc<Mutex<bool>>,
}

async fn prompt_handler(State(state): State<MockEngine>, Json(body): Json<Value>) -> Json<Value> {
    state.prompts.lock().unwrap().push(body);
    Json(json!({ "prompt_id": "p-1" }))
}

async fn ws_handler(State(state): State<MockEngine>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| stream_frames(state, socket))
}

async fn stream_frames(state: MockEngine, mut socket: WebSocket) {
    if *state.drop_stream.lock().unwrap() {
        return;
    }

    // Wait until the prompt has actually been submitted, then replay
    for _ in 0..100 {
        if !state.prompts.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let script = state.script.lock().unwrap().clone();
    for frame in script {
        if socket
            .send(Message::Text(frame.to_string().into()))
            .await
            .is_err()
        {
            return;
        }
    }

    // Keep the connection open; the waiter closes it after the sentinel
    tokio::time::sleep(Duration::from_secs(10)).await;
}

async fn view_handler() -> &'static [u8] {
    b"pngbytes"
}

async fn spawn_app(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service()).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_engine(state: MockEngine) -> String {
    let router = Router::new()
        .route("/prompt", post(prompt_handler))
        .route("/ws", any(ws_handler))
        .route("/view", get(view_handler))
        .with_state(state);
    spawn_app(router).await
}

async fn spawn_blob(counter: Arc<AtomicUsize>) -> String {
    let base: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    let base_for_handler = Arc::clone(&base);
    let router = Router::new().route(
        "/upload",
        post(move || {
            let counter = Arc::clone(&counter);
            let base = Arc::clone(&base_for_handler);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let base = base.lock().unwrap().clone();
                Json(json!({ "url": format!("{base}/files/rehosted-{n}") }))
            }
        }),
    );
    let url = spawn_app(router).await;
    *base.lock().unwrap() = url.clone();
    url
}

fn write_workflow(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("t2i.json");
    let graph = json!({
        "9": {"class_type": "SaveImage", "inputs": {}, "_meta": {"title": "$output.main"}},
        "12": {"class_type": "SaveImage", "inputs": {}, "_meta": {"title": "$output.thumb"}}
    });
    std::fs::write(&path, serde_json::to_string_pretty(&graph).unwrap()).unwrap();
    path
}

fn executor(engine_url: &str, blob_url: &str, timeout: Duration) -> WorkflowExecutor {
    let engine = Arc::new(EngineClient::new(&EngineConfig {
        base_url: engine_url.to_string(),
        api_key: None,
        cookies: None,
    }));
    let blob = Arc::new(BlobClient::new(blob_url));
    WorkflowExecutor::with_waiter(engine, blob, Box::new(WsWaiter::default()), timeout)
}

/// Streamed outputs are accumulated per node and bucketed by output variable
#[tokio::test]
async fn streamed_outputs_are_collected_and_grouped() {
    let state = MockEngine::default();
    *state.script.lock().unwrap() = vec![
        json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 1}}}}),
        json!({"type": "executing", "data": {"node": "9", "prompt_id": "p-1"}}),
        json!({
            "type": "executed",
            "data": {
                "node": "9",
                "prompt_id": "p-1",
                "output": {"images": [{"filename": "m1.png", "subfolder": "", "type": "output"}]}
            }
        }),
        json!({
            "type": "executed",
            "data": {
                "node": "12",
                "prompt_id": "p-1",
                "output": {"images": [{"filename": "t1.png", "subfolder": "", "type": "output"}]}
            }
        }),
        json!({"type": "executing", "data": {"node": null, "prompt_id": "p-1"}}),
    ];
    let engine_url = spawn_engine(state.clone()).await;
    let uploads = Arc::new(AtomicUsize::new(0));
    let blob_url = spawn_blob(Arc::clone(&uploads)).await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(dir.path());

    let executor = executor(&engine_url, &blob_url, Duration::from_secs(10));
    let result = executor.execute(&path, &serde_json::Map::new()).await.unwrap();

    assert_eq!(result.status, ExecStatus::Completed);
    assert_eq!(result.images_by_var.len(), 2);
    assert_eq!(result.images_by_var["main"].len(), 1);
    assert_eq!(result.images_by_var["thumb"].len(), 1);
    // Flat list is main then thumb, in collection order
    assert_eq!(
        result.images,
        vec![
            result.images_by_var["main"][0].clone(),
            result.images_by_var["thumb"][0].clone()
        ]
    );
    // Both unique URLs were re-hosted exactly once each
    assert_eq!(uploads.load(Ordering::SeqCst), 2);
}

/// An execution_error frame ends the wait with the engine's message
#[tokio::test]
async fn stream_error_frame_is_surfaced() {
    let state = MockEngine::default();
    *state.script.lock().unwrap() = vec![json!({
        "type": "execution_error",
        "data": {"prompt_id": "p-1", "exception_message": "CUDA OOM"}
    })];
    let engine_url = spawn_engine(state.clone()).await;
    let blob_url = spawn_blob(Arc::new(AtomicUsize::new(0))).await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(dir.path());

    let executor = executor(&engine_url, &blob_url, Duration::from_secs(10));
    let result = executor.execute(&path, &serde_json::Map::new()).await.unwrap();

    assert_eq!(result.status, ExecStatus::Error);
    assert_eq!(result.msg.as_deref(), Some("CUDA OOM"));
}

/// A stream that dies before the sentinel is an error, not a hang
#[tokio::test]
async fn closed_stream_is_an_error() {
    let state = MockEngine::default();
    *state.drop_stream.lock().unwrap() = true;
    let engine_url = spawn_engine(state.clone()).await;
    let blob_url = spawn_blob(Arc::new(AtomicUsize::new(0))).await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(dir.path());

    let executor = executor(&engine_url, &blob_url, Duration::from_secs(10));
    let result = executor.execute(&path, &serde_json::Map::new()).await.unwrap();

    assert_eq!(result.status, ExecStatus::Error);
    assert!(result.msg.unwrap().contains("closed"));
}
