//! Run routes: run creation, point lookup, and the live event feed.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use easel_store::recorder::{self, RunCreatedPayload, RunEventType, EVENT_PAGE_SIZE};
use easel_store::{ids, NodeRun, RunStatus, TriggerSource};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Node type assigned when the client does not name one; served by the
/// worker's simulated backend.
const DEFAULT_NODE_TYPE: &str = "demo.simulate.v1";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateRunBody {
  pub trigger_source: Option<TriggerSource>,
  pub node_type: Option<String>,
  pub params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunResponse {
  pub run_id: String,
}

pub async fn create_run(
  State(state): State<AppState>,
  Path((canvas_id, node_id)): Path<(String, String)>,
  body: Result<Option<Json<CreateRunBody>>, JsonRejection>,
) -> Result<Json<CreateRunResponse>, ApiError> {
  // Optional body, but a malformed one is rejected before any mutation.
  let body = body?.map(|Json(body)| body).unwrap_or_default();

  if state.store.get_canvas(&canvas_id).await?.is_none() {
    return Err(ApiError::CanvasNotFound);
  }

  let run_id = ids::new_id();
  let now = ids::now();
  let node_type = body
    .node_type
    .unwrap_or_else(|| DEFAULT_NODE_TYPE.to_string());

  // Freeze what this run executes at creation time; later canvas edits must
  // never retroactively change it.
  let input_snapshot = serde_json::json!({ "inputs": {} });
  let params_snapshot = serde_json::json!({
    "nodeTypeVersion": 1,
    "params": body.params.unwrap_or_else(|| serde_json::json!({})),
  });

  let run = NodeRun {
    id: run_id.clone(),
    canvas_id: canvas_id.clone(),
    node_id: node_id.clone(),
    node_type: node_type.clone(),
    status: RunStatus::Queued,
    trigger_source: body.trigger_source.unwrap_or(TriggerSource::Manual),
    idempotency_key: None,
    input_snapshot_json: input_snapshot.to_string(),
    params_snapshot_json: params_snapshot.to_string(),
    output_json: None,
    error_json: None,
    progress: 0,
    parent_run_id: None,
    hop: 0,
    created_at: now,
    started_at: None,
    finished_at: None,
  };

  // Persist, record, then enqueue. A crash after persistence leaves an
  // inspectable never-started run; the reverse order could enqueue a run the
  // store never recorded.
  state.store.insert_run(&run).await?;
  recorder::record(
    state.store.as_ref(),
    &run_id,
    RunEventType::RunCreated,
    &RunCreatedPayload {
      run_id: run_id.clone(),
      canvas_id,
      node_id,
      node_type,
      created_at: now,
    },
  )
  .await?;
  state.queue.enqueue(&run_id).await?;

  info!(run_id = %run_id, "run created");
  Ok(Json(CreateRunResponse { run_id }))
}

pub async fn get_run(
  State(state): State<AppState>,
  Path(run_id): Path<String>,
) -> Result<Json<NodeRun>, ApiError> {
  let row = state
    .store
    .get_run(&run_id)
    .await?
    .ok_or(ApiError::RunNotFound)?;
  Ok(Json(row))
}

/// Live event feed for one run.
///
/// Replays the full history first (cursor at zero), then polls the store on
/// a fixed interval with the last delivered event's `seq` as the cursor,
/// until the client disconnects. A client connecting after the run finished
/// still observes every event.
pub async fn run_events(
  State(state): State<AppState>,
  Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
  if state.store.get_run(&run_id).await?.is_none() {
    return Err(ApiError::RunNotFound);
  }

  let store = state.store.clone();
  let poll = state.event_poll;
  let stream = async_stream::stream! {
    let mut cursor: Option<i64> = None;
    loop {
      match store.list_run_events_after(&run_id, cursor, EVENT_PAGE_SIZE).await {
        Ok(events) => {
          for event in events {
            cursor = Some(event.seq);
            yield Ok(Event::default().event(event.event_type).data(event.payload_json));
          }
        }
        Err(err) => {
          // Transient store trouble only delays the feed; the cursor is
          // unchanged so nothing is skipped.
          warn!(run_id = %run_id, error = %err, "event feed poll failed");
        }
      }
      tokio::time::sleep(poll).await;
    }
  };

  Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
