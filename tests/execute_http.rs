//! End-to-end execution tests against a mock engine and blob store
//!
//! Each test stands up small axum apps on ephemeral ports playing the engine
//! and the blob store, writes a workflow file into a tempdir and drives the
//! executor through the history-polling strategy.

use axum::{
    extract::{Path as AxumPath, State},
    response::Json,
    routing::{get, post},
    Router,
};
use comfygate::blob::BlobClient;
use comfygate::config::EngineConfig;
use comfygate::engine::client::EngineClient;
use comfygate::runtime::executor::WorkflowExecutor;
use comfygate::runtime::http_waiter::HttpWaiter;
use comfygate::ExecStatus;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared state of the mock engine
#[derive(Clone, Default)]
struct MockEngine {
    /// Bodies received on POST /prompt
    prompts: Arc<Mutex<Vec<Value>>>,
    /// History record served for every prompt id; Null means "no entry yet"
    history: Arc<Mutex<Value>>,
}

async fn prompt_handler(State(state): State<MockEngine>, Json(body): Json<Value>) -> Json<Value> {
    state.prompts.lock().unwrap().push(body);
    Json(json!({ "prompt_id": "p-1" }))
}

async fn history_handler(
    State(state): State<MockEngine>,
    AxumPath(prompt_id): AxumPath<String>,
) -> Json<Value> {
    let record = state.history.lock().unwrap().clone();
    if record.is_null() {
        Json(json!({}))
    } else {
        Json(json!({ prompt_id: record }))
    }
}

async fn upload_image_handler() -> Json<Value> {
    Json(json!({ "name": "cat_XX.jpg" }))
}

async fn view_handler() -> &'static [u8] {
    b"pngbytes"
}

async fn media_handler() -> &'static [u8] {
    b"jpgbytes"
}

/// Bind a router on an ephemeral port and serve it in the background
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
        .route("/history/{id}", get(history_handler))
        .route("/upload/image", post(upload_image_handler))
        .route("/view", get(view_handler))
        .route("/media/cat.jpg", get(media_handler))
        .with_state(state);
    spawn_app(router).await
}

/// Mock blob store counting uploads and handing out sequential URLs
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

fn write_workflow(dir: &std::path::Path, name: &str, graph: &Value) -> PathBuf {
    let path = dir.join(format!("{name}.json"));
    std::fs::write(&path, serde_json::to_string_pretty(graph).unwrap()).unwrap();
    path
}

fn executor(engine_url: &str, blob_url: &str, timeout: Duration) -> WorkflowExecutor {
    let engine = Arc::new(EngineClient::new(&EngineConfig {
        base_url: engine_url.to_string(),
        api_key: None,
        cookies: None,
    }));
    let blob = Arc::new(BlobClient::new(blob_url));
    WorkflowExecutor::with_waiter(
        engine,
        blob,
        Box::new(HttpWaiter::with_poll_interval(Duration::from_millis(50))),
        timeout,
    )
}

/// Text-to-image with a plain parameter: values land in the right inputs,
/// outputs come back grouped and re-hosted
#[tokio::test]
async fn plain_params_round_trip_and_rehost() {
    let state = MockEngine::default();
    *state.history.lock().unwrap() = json!({
        "outputs": {
            "9": {"images": [{"filename": "foo.png", "subfolder": "", "type": "output"}]}
        }
    });
    let engine_url = spawn_engine(state.clone()).await;
    let uploads = Arc::new(AtomicUsize::new(0));
    let blob_url = spawn_blob(Arc::clone(&uploads)).await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(
        dir.path(),
        "t2i",
        &json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {"seed": 0},
                "_meta": {"title": "$seed.seed!:random seed"}
            },
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": {"width": 512, "height": 512},
                "_meta": {"title": "$width.width"}
            },
            "6": {
                "class_type": "EmptyLatentImage",
                "inputs": {"width": 512, "height": 512},
                "_meta": {"title": "$height.height"}
            },
            "9": {"class_type": "SaveImage", "inputs": {}, "_meta": {"title": "save"}}
        }),
    );

    let executor = executor(&engine_url, &blob_url, Duration::from_secs(5));
    let params = serde_json::from_value(json!({"seed": 42, "width": 768})).unwrap();
    let result = executor.execute(&path, &params).await.unwrap();

    assert_eq!(result.status, ExecStatus::Completed);
    assert_eq!(result.prompt_id.as_deref(), Some("p-1"));

    // The engine received the graph with caller values and defaults applied
    let prompts = state.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    let submitted = &prompts[0]["prompt"];
    assert_eq!(submitted["3"]["inputs"]["seed"], json!(42));
    assert_eq!(submitted["5"]["inputs"]["width"], json!(768));
    assert_eq!(submitted["6"]["inputs"]["height"], json!(512));
    assert!(prompts[0]["client_id"].as_str().is_some());

    // One image, re-hosted onto the blob store, grouped under node id "9"
    assert_eq!(uploads.load(Ordering::SeqCst), 1);
    assert_eq!(result.images.len(), 1);
    assert!(result.images[0].starts_with(&blob_url));
    assert_eq!(result.images_by_var["9"], result.images);
}

/// URL-valued media parameters are uploaded to the engine first and the
/// assigned handle is substituted into the graph
#[tokio::test]
async fn url_media_param_becomes_engine_handle() {
    let state = MockEngine::default();
    *state.history.lock().unwrap() = json!({
        "outputs": {
            "9": {"images": [{"filename": "out.png", "subfolder": "", "type": "output"}]}
        }
    });
    let engine_url = spawn_engine(state.clone()).await;
    let blob_url = spawn_blob(Arc::new(AtomicUsize::new(0))).await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(
        dir.path(),
        "i2i",
        &json!({
            "1": {
                "class_type": "LoadImage",
                "inputs": {"image": "placeholder.png"},
                "_meta": {"title": "$image.image"}
            },
            "9": {"class_type": "SaveImage", "inputs": {}, "_meta": {"title": "save"}}
        }),
    );

    let executor = executor(&engine_url, &blob_url, Duration::from_secs(5));
    let params =
        serde_json::from_value(json!({"image": format!("{engine_url}/media/cat.jpg")})).unwrap();
    let result = executor.execute(&path, &params).await.unwrap();

    assert_eq!(result.status, ExecStatus::Completed);
    let prompts = state.prompts.lock().unwrap();
    assert_eq!(prompts[0]["prompt"]["1"]["inputs"]["image"], json!("cat_XX.jpg"));
}

/// Engine-reported failures surface as status=error with the engine text
#[tokio::test]
async fn engine_error_is_surfaced() {
    let state = MockEngine::default();
    *state.history.lock().unwrap() = json!({
        "status": {
            "status_str": "error",
            "messages": [["execution_error", {"exception_message": "CUDA OOM"}]]
        }
    });
    let engine_url = spawn_engine(state.clone()).await;
    let blob_url = spawn_blob(Arc::new(AtomicUsize::new(0))).await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(
        dir.path(),
        "t2i",
        &json!({
            "9": {"class_type": "SaveImage", "inputs": {}, "_meta": {"title": "save"}}
        }),
    );

    let executor = executor(&engine_url, &blob_url, Duration::from_secs(5));
    let result = executor.execute(&path, &serde_json::Map::new()).await.unwrap();

    assert_eq!(result.status, ExecStatus::Error);
    assert_eq!(result.msg.as_deref(), Some("CUDA OOM"));
}

/// A never-completing engine hits the invocation deadline
#[tokio::test]
async fn missing_history_times_out() {
    let state = MockEngine::default();
    // history stays Null: the entry never appears
    let engine_url = spawn_engine(state.clone()).await;
    let blob_url = spawn_blob(Arc::new(AtomicUsize::new(0))).await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_workflow(
        dir.path(),
        "t2i",
        &json!({
            "9": {"class_type": "SaveImage", "inputs": {}, "_meta": {"title": "save"}}
        }),
    );

    let executor = executor(&engine_url, &blob_url, Duration::from_secs(1));
    let started = std::time::Instant::now();
    let result = executor.execute(&path, &serde_json::Map::new()).await.unwrap();

    assert_eq!(result.status, ExecStatus::Timeout);
    let duration = result.duration.unwrap();
    assert!(duration >= 1.0, "duration was {duration}");
    assert!(started.elapsed() < Duration::from_secs(5));
}
