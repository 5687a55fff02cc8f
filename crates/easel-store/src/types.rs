//! Stored row types.
//!
//! These mirror the durable schema one-to-one: snake_case column names,
//! JSON blobs kept as opaque strings, RFC 3339 timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A canvas document under optimistic concurrency control.
///
/// `version` starts at 1 and increments by exactly one on every successful
/// update; `graph_json` is owned by the editor and treated as opaque bytes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Canvas {
  pub id: String,
  pub name: String,
  pub graph_json: String,
  pub version: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Input for canvas creation; the store assigns `version = 1`.
#[derive(Debug, Clone)]
pub struct NewCanvas {
  pub id: String,
  pub name: String,
  pub graph_json: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Result of a successful canvas update.
#[derive(Debug, Clone, Serialize)]
pub struct CanvasVersion {
  pub id: String,
  pub version: i64,
  pub updated_at: DateTime<Utc>,
}

/// Run lifecycle status.
///
/// `Succeeded`, `Failed` and `Canceled` are terminal: once reached, the run
/// row never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RunStatus {
  Queued,
  Running,
  Succeeded,
  Failed,
  Canceled,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Queued => "queued",
      Self::Running => "running",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
      Self::Canceled => "canceled",
    }
  }
}

/// What requested the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TriggerSource {
  Manual,
  Auto,
}

/// One execution attempt of a single node's task.
///
/// Created once when the run is requested; mutated only by the worker, and
/// only until it reaches a terminal status. The input/params snapshots are
/// frozen at creation time so later canvas edits never change what a run
/// claims it executed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NodeRun {
  pub id: String,
  pub canvas_id: String,
  pub node_id: String,
  pub node_type: String,
  pub status: RunStatus,
  pub trigger_source: TriggerSource,
  pub idempotency_key: Option<String>,
  pub input_snapshot_json: String,
  pub params_snapshot_json: String,
  pub output_json: Option<String>,
  pub error_json: Option<String>,
  pub progress: i64,
  pub parent_run_id: Option<String>,
  pub hop: i64,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
}

/// Last-write-wins merge over the mutable run fields. Absent fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
  pub status: Option<RunStatus>,
  pub progress: Option<i64>,
  pub output_json: Option<String>,
  pub error_json: Option<String>,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
}

/// Kind of generated media artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AssetKind {
  Image,
  Video,
}

impl AssetKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Image => "image",
      Self::Video => "video",
    }
  }
}

/// A media artifact produced by a successful run. Written exactly once,
/// immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
  pub id: String,
  pub canvas_id: String,
  #[serde(rename = "type")]
  pub kind: AssetKind,
  pub mime: String,
  pub size_bytes: i64,
  pub width: Option<i64>,
  pub height: Option<i64>,
  pub duration_ms: Option<i64>,
  pub url: String,
  pub thumbnail_url: Option<String>,
  pub meta_json: String,
  pub source_run_id: String,
  pub created_at: DateTime<Utc>,
}

/// Input for an event append; the store assigns the per-run `seq`.
#[derive(Debug, Clone)]
pub struct NewRunEvent {
  pub id: String,
  pub run_id: String,
  pub event_type: String,
  pub payload_json: String,
  pub created_at: DateTime<Utc>,
}

/// One entry in a run's append-only event log.
///
/// `seq` is strictly increasing per run and is the pagination cursor; it is
/// assigned atomically on append so a poll-based reader never sees duplicates
/// or gaps. `created_at` is retained for display and stays non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunEvent {
  pub id: String,
  pub run_id: String,
  pub seq: i64,
  #[serde(rename = "type")]
  #[sqlx(rename = "type")]
  pub event_type: String,
  pub payload_json: String,
  pub created_at: DateTime<Utc>,
}
