//! HTTP surface tests, driven through the router without a listener.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use easel_api::AppState;
use easel_queue::RunQueue;
use easel_store::Store;
use easel_worker::{GeneratorRegistry, RunExecutor, SimulateGenerator, SIMULATE_NODE_TYPE};
use futures_util::StreamExt;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Harness {
  router: Router,
  store: Arc<dyn Store>,
  queue: RunQueue,
}

async fn harness(dir: &TempDir) -> Harness {
  let store = easel_store::open_store(&dir.path().join("store.sqlite"))
    .await
    .expect("open store");
  let queue = RunQueue::open(&dir.path().join("queue.sqlite"))
    .await
    .expect("open queue");
  queue.migrate().await.expect("migrate queue");
  let state =
    AppState::new(store.clone(), queue.clone()).with_event_poll(Duration::from_millis(25));
  Harness {
    router: easel_api::router(state),
    store,
    queue,
  }
}

fn get(uri: &str) -> Request<Body> {
  Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
  Request::builder()
    .method(method)
    .uri(uri)
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap()
}

async fn response_json(response: Response) -> serde_json::Value {
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

/// Plays the worker's part: claims every queued job and runs it to a
/// terminal state with a fast simulated backend.
async fn drain_queue(h: &Harness) {
  let mut registry = GeneratorRegistry::new();
  registry.register(
    SIMULATE_NODE_TYPE,
    Arc::new(SimulateGenerator::new(Duration::from_millis(1))),
  );
  let executor = RunExecutor::new(h.store.clone(), Arc::new(registry));
  while let Some(job) = h.queue.claim(Duration::from_secs(60), 5).await.unwrap() {
    executor
      .execute(&job.run_id, &CancellationToken::new())
      .await
      .unwrap();
    h.queue.complete(job.id).await.unwrap();
  }
}

async fn create_canvas(h: &Harness, name: &str) -> String {
  let response = h
    .router
    .clone()
    .oneshot(json_request(
      Method::POST,
      "/api/canvases",
      json!({ "name": name }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body = response_json(response).await;
  body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_ok() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;

  let response = h.router.clone().oneshot(get("/health")).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response_json(response).await, json!({ "ok": true }));
}

#[tokio::test]
async fn canvas_updates_are_versioned() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;
  let id = create_canvas(&h, "demo").await;

  let response = h
    .router
    .clone()
    .oneshot(json_request(
      Method::PUT,
      &format!("/api/canvases/{id}"),
      json!({ "graph_json": r#"{"nodes":["a"]}"#, "version": 1 }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response_json(response).await["version"], 2);

  // A writer still holding version 1 must conflict, not overwrite.
  let response = h
    .router
    .clone()
    .oneshot(json_request(
      Method::PUT,
      &format!("/api/canvases/{id}"),
      json!({ "graph_json": r#"{"nodes":["b"]}"#, "version": 1 }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::CONFLICT);
  assert_eq!(
    response_json(response).await["code"],
    "CANVAS_VERSION_CONFLICT"
  );

  let response = h
    .router
    .clone()
    .oneshot(get(&format!("/api/canvases/{id}")))
    .await
    .unwrap();
  let body = response_json(response).await;
  assert_eq!(body["version"], 2);
  assert_eq!(body["graph_json"], r#"{"nodes":["a"]}"#);
}

#[tokio::test]
async fn canvas_creation_without_a_body_uses_defaults() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;

  let request = Request::builder()
    .method(Method::POST)
    .uri("/api/canvases")
    .body(Body::empty())
    .unwrap();
  let response = h.router.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body = response_json(response).await;
  assert_eq!(body["name"], "Untitled canvas");
  assert_eq!(body["version"], 1);
  let graph: serde_json::Value =
    serde_json::from_str(body["graph_json"].as_str().unwrap()).unwrap();
  assert_eq!(graph["nodes"], json!([]));
  assert_eq!(graph["viewport"]["zoom"], 1);
}

#[tokio::test]
async fn canvas_name_is_length_checked() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;

  let response = h
    .router
    .clone()
    .oneshot(json_request(
      Method::POST,
      "/api/canvases",
      json!({ "name": "x".repeat(101) }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(response_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn updating_a_missing_canvas_is_not_found() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;

  let response = h
    .router
    .clone()
    .oneshot(json_request(
      Method::PUT,
      "/api/canvases/ghost",
      json!({ "graph_json": "{}", "version": 1 }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
  assert_eq!(response_json(response).await["code"], "CANVAS_NOT_FOUND");
}

#[tokio::test]
async fn malformed_update_body_is_a_validation_error() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;
  let id = create_canvas(&h, "demo").await;

  let response = h
    .router
    .clone()
    .oneshot(json_request(
      Method::PUT,
      &format!("/api/canvases/{id}"),
      json!({ "graph_json": 5, "version": "one" }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(response_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn malformed_canvas_creation_body_is_a_validation_error() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;

  let request = Request::builder()
    .method(Method::POST)
    .uri("/api/canvases")
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from("{invalid"))
    .unwrap();
  let response = h.router.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(response_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn malformed_run_creation_body_is_a_validation_error() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;
  let canvas_id = create_canvas(&h, "demo").await;

  let request = Request::builder()
    .method(Method::POST)
    .uri(format!("/api/canvases/{canvas_id}/nodes/n1/run"))
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from("{invalid"))
    .unwrap();
  let response = h.router.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(response_json(response).await["code"], "VALIDATION_ERROR");
  assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn run_on_a_missing_canvas_is_rejected_and_not_enqueued() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;

  let response = h
    .router
    .clone()
    .oneshot(json_request(
      Method::POST,
      "/api/canvases/ghost/nodes/n1/run",
      json!({}),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
  assert_eq!(response_json(response).await["code"], "CANVAS_NOT_FOUND");
  assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn fetching_a_missing_run_is_not_found() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;

  let response = h.router.clone().oneshot(get("/api/runs/ghost")).await.unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
  assert_eq!(response_json(response).await["code"], "RUN_NOT_FOUND");
}

#[tokio::test]
async fn run_travels_from_request_through_queue_to_success() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;
  let canvas_id = create_canvas(&h, "demo").await;

  let response = h
    .router
    .clone()
    .oneshot(json_request(
      Method::POST,
      &format!("/api/canvases/{canvas_id}/nodes/n1/run"),
      json!({ "params": { "prompt": "a lighthouse at dusk" } }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let run_id = response_json(response).await["runId"]
    .as_str()
    .unwrap()
    .to_string();

  let response = h
    .router
    .clone()
    .oneshot(get(&format!("/api/runs/{run_id}")))
    .await
    .unwrap();
  let body = response_json(response).await;
  assert_eq!(body["status"], "queued");
  assert_eq!(body["progress"], 0);
  assert_eq!(h.queue.depth().await.unwrap(), 1);

  // The params snapshot was frozen at creation time.
  let row = h.store.get_run(&run_id).await.unwrap().unwrap();
  assert!(row.params_snapshot_json.contains("a lighthouse at dusk"));

  drain_queue(&h).await;

  let response = h
    .router
    .clone()
    .oneshot(get(&format!("/api/runs/{run_id}")))
    .await
    .unwrap();
  let body = response_json(response).await;
  assert_eq!(body["status"], "succeeded");
  assert_eq!(body["progress"], 100);
  let outputs: serde_json::Value =
    serde_json::from_str(body["output_json"].as_str().unwrap()).unwrap();
  assert_eq!(outputs["assets"].as_array().unwrap().len(), 1);
  assert_eq!(h.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn event_feed_replays_the_full_history_of_a_finished_run() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;
  let canvas_id = create_canvas(&h, "demo").await;

  let response = h
    .router
    .clone()
    .oneshot(json_request(
      Method::POST,
      &format!("/api/canvases/{canvas_id}/nodes/n1/run"),
      json!({}),
    ))
    .await
    .unwrap();
  let run_id = response_json(response).await["runId"]
    .as_str()
    .unwrap()
    .to_string();
  drain_queue(&h).await;

  let response = h
    .router
    .clone()
    .oneshot(get(&format!("/api/runs/{run_id}/events")))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert!(response
    .headers()
    .get(header::CONTENT_TYPE)
    .unwrap()
    .to_str()
    .unwrap()
    .starts_with("text/event-stream"));

  // The stream never ends on its own; read until the terminal event shows up.
  let mut body = response.into_body().into_data_stream();
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  let mut seen = String::new();
  while !seen.contains("event: run.succeeded") {
    let chunk = tokio::time::timeout_at(deadline, body.next())
      .await
      .expect("timed out waiting for run.succeeded")
      .expect("feed closed early")
      .unwrap();
    seen.push_str(std::str::from_utf8(&chunk).unwrap());
  }

  let position = |needle: &str| seen.find(needle).unwrap_or(usize::MAX);
  assert!(position("event: run.created") < position("event: run.started"));
  assert!(position("event: run.started") < position("event: asset.created"));
  assert!(position("event: asset.created") < position("event: run.succeeded"));
  assert_eq!(seen.matches("event: run.progress").count(), 5);
}

#[tokio::test]
async fn event_feed_for_a_missing_run_is_not_found() {
  let dir = TempDir::new().unwrap();
  let h = harness(&dir).await;

  let response = h
    .router
    .clone()
    .oneshot(get("/api/runs/ghost/events"))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
  assert_eq!(response_json(response).await["code"], "RUN_NOT_FOUND");
}
