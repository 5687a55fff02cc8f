//! Run event recorder.
//!
//! Thin helper that serializes a typed payload and appends it to a run's
//! log. Every mutation of a run is persisted first and its event appended
//! after, so a crash between the two only delays observers, never corrupts
//! the source of truth.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ids;
use crate::types::{AssetKind, NewRunEvent, RunEvent};
use crate::Store;

/// Page size used by event-feed polls.
pub const EVENT_PAGE_SIZE: i64 = 200;

/// The event vocabulary of a run's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEventType {
  RunCreated,
  RunStarted,
  RunProgress,
  RunLog,
  AssetCreated,
  RunSucceeded,
  RunFailed,
  RunCanceled,
  AutoTriggered,
}

impl RunEventType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::RunCreated => "run.created",
      Self::RunStarted => "run.started",
      Self::RunProgress => "run.progress",
      Self::RunLog => "run.log",
      Self::AssetCreated => "asset.created",
      Self::RunSucceeded => "run.succeeded",
      Self::RunFailed => "run.failed",
      Self::RunCanceled => "run.canceled",
      Self::AutoTriggered => "auto.triggered",
    }
  }
}

impl fmt::Display for RunEventType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Serialize `payload` and append it to the run's log with a fresh id and
/// timestamp.
pub async fn record<P: Serialize + Sync>(
  store: &dyn Store,
  run_id: &str,
  event_type: RunEventType,
  payload: &P,
) -> Result<RunEvent, StoreError> {
  let event = NewRunEvent {
    id: ids::new_id(),
    run_id: run_id.to_string(),
    event_type: event_type.as_str().to_string(),
    payload_json: serde_json::to_string(payload)?,
    created_at: ids::now(),
  };
  store.append_run_event(&event).await
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCreatedPayload {
  pub run_id: String,
  pub canvas_id: String,
  pub node_id: String,
  pub node_type: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStartedPayload {
  pub run_id: String,
  pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgressPayload {
  pub run_id: String,
  pub progress: i64,
  pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCreatedPayload {
  pub run_id: String,
  pub asset: AssetRef,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: AssetKind,
  pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSucceededPayload {
  pub run_id: String,
  pub finished_at: DateTime<Utc>,
  pub outputs: RunOutputs,
}

/// Asset ids produced by a run, including the port→assets mapping downstream
/// consumers use to wire outputs into other nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutputs {
  pub assets: Vec<String>,
  pub by_port: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailedPayload {
  pub run_id: String,
  pub message: String,
  pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCanceledPayload {
  pub run_id: String,
  pub finished_at: DateTime<Utc>,
}
