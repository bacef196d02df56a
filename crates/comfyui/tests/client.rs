//! Integration tests for the polling execution client, driven against an
//! in-process stub of the graph server's wire protocol.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use promokit_comfyui::client::{PollConfig, WorkflowClient, WorkflowClientError};
use promokit_comfyui::graph::WorkflowGraph;

/// Scripted stub state: each history poll pops the next response; the
/// last one repeats once the script runs dry.
#[derive(Clone)]
struct StubState {
    history: Arc<Mutex<VecDeque<Value>>>,
    reject_submissions: bool,
}

async fn prompt_handler(State(state): State<StubState>) -> Result<Json<Value>, axum::http::StatusCode> {
    if state.reject_submissions {
        return Err(axum::http::StatusCode::BAD_REQUEST);
    }
    Ok(Json(json!({"prompt_id": "job-1", "number": 0})))
}

async fn history_handler(
    State(state): State<StubState>,
    Path(prompt_id): Path<String>,
) -> Json<Value> {
    let mut script = state.history.lock().await;
    let response = if script.len() > 1 {
        script.pop_front().unwrap_or_else(|| json!({}))
    } else {
        script.front().cloned().unwrap_or_else(|| json!({}))
    };
    // The history endpoint keys records by prompt id; an empty object
    // means "still queued".
    if response.as_object().is_some_and(|o| o.is_empty()) {
        Json(json!({}))
    } else {
        let mut keyed = serde_json::Map::new();
        keyed.insert(prompt_id, response);
        Json(Value::Object(keyed))
    }
}

async fn view_handler() -> Vec<u8> {
    b"fake-png-bytes".to_vec()
}

async fn upload_handler() -> Json<Value> {
    Json(json!({"name": "upload_001.png", "subfolder": ""}))
}

async fn stats_handler() -> Json<Value> {
    Json(json!({"system": {"os": "stub"}}))
}

/// Bind the stub on an ephemeral port and return its base URL.
async fn serve(script: Vec<Value>, reject_submissions: bool) -> String {
    let state = StubState {
        history: Arc::new(Mutex::new(script.into())),
        reject_submissions,
    };
    let app = Router::new()
        .route("/prompt", post(prompt_handler))
        .route("/history/{prompt_id}", get(history_handler))
        .route("/view", get(view_handler))
        .route("/upload/image", post(upload_handler))
        .route("/system_stats", get(stats_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn fast_poll() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(10),
        timeout: Duration::from_millis(250),
    }
}

fn trivial_graph() -> WorkflowGraph {
    let mut graph = WorkflowGraph::new();
    graph.add_node("1", "EmptyLatentImage", json!({"width": 64, "height": 64}));
    graph
}

fn completed_record() -> Value {
    json!({
        "status": {"completed": true},
        "outputs": {
            "7": {"images": [{"filename": "out_00001.png", "subfolder": "", "type": "output"}]}
        }
    })
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_returns_output_bytes_after_polling() {
    // First poll: still queued. Second poll: completed with one image.
    let url = serve(vec![json!({}), completed_record()], false).await;
    let client = WorkflowClient::new(url);

    let images = client.run(&trivial_graph(), fast_poll()).await.unwrap();
    assert_eq!(images, vec![b"fake-png-bytes".to_vec()]);
}

#[tokio::test]
async fn upload_input_artifact_returns_server_name() {
    let url = serve(vec![], false).await;
    let client = WorkflowClient::new(url);

    let name = client
        .upload_input_artifact(b"png".to_vec(), "input.png")
        .await
        .unwrap();
    assert_eq!(name, "upload_001.png");
}

#[tokio::test]
async fn check_connection_reports_liveness() {
    let url = serve(vec![], false).await;
    let client = WorkflowClient::new(url);
    assert!(client.check_connection().await);

    let dead = WorkflowClient::new("http://127.0.0.1:1".to_string());
    assert!(!dead.check_connection().await);
}

// ---------------------------------------------------------------------------
// Failure semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submission_rejection_maps_to_submission_error() {
    let url = serve(vec![], true).await;
    let client = WorkflowClient::new(url);

    let err = client.submit(&trivial_graph()).await.unwrap_err();
    assert_matches!(err, WorkflowClientError::Submission { status: 400, .. });
}

#[tokio::test]
async fn await_completion_times_out_when_job_never_finishes() {
    let url = serve(vec![json!({})], false).await;
    let client = WorkflowClient::new(url);

    let err = client
        .await_completion("job-1", fast_poll())
        .await
        .unwrap_err();
    assert_matches!(err, WorkflowClientError::Timeout(_));
}

#[tokio::test]
async fn error_record_raises_immediately() {
    // The record carries an error and is not marked completed; the error
    // must win on the very first poll rather than running out the clock.
    let record = json!({"status": {"completed": false, "error": "node 5 exploded"}});
    let url = serve(vec![record], false).await;
    let client = WorkflowClient::new(url);

    let started = std::time::Instant::now();
    let err = client
        .await_completion("job-1", fast_poll())
        .await
        .unwrap_err();

    assert_matches!(
        err,
        WorkflowClientError::RemoteExecution(message) if message == "node 5 exploded"
    );
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn completed_job_with_no_outputs_is_a_failure() {
    let record = json!({"status": {"completed": true}, "outputs": {}});
    let url = serve(vec![record], false).await;
    let client = WorkflowClient::new(url);

    let err = client.run(&trivial_graph(), fast_poll()).await.unwrap_err();
    assert_matches!(err, WorkflowClientError::NoOutput);
}

#[tokio::test]
async fn transport_failures_propagate_unwrapped() {
    let client = WorkflowClient::new("http://127.0.0.1:1".to_string());
    let err = client.submit(&trivial_graph()).await.unwrap_err();
    assert_matches!(err, WorkflowClientError::Transport(_));
}
