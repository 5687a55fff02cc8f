//! SQLite backend.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::StoreError;
use crate::types::{
  Asset, Canvas, CanvasVersion, NewCanvas, NewRunEvent, NodeRun, RunEvent, RunPatch,
};
use crate::Store;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS canvas (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  graph_json TEXT NOT NULL,
  version INTEGER NOT NULL DEFAULT 1,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS node_run (
  id TEXT PRIMARY KEY,
  canvas_id TEXT NOT NULL,
  node_id TEXT NOT NULL,
  node_type TEXT NOT NULL,
  status TEXT NOT NULL,
  trigger_source TEXT NOT NULL,
  idempotency_key TEXT,
  input_snapshot_json TEXT NOT NULL,
  params_snapshot_json TEXT NOT NULL,
  output_json TEXT,
  error_json TEXT,
  progress INTEGER NOT NULL DEFAULT 0,
  parent_run_id TEXT,
  hop INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL,
  started_at TEXT,
  finished_at TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_node_run_idempotency_key ON node_run(idempotency_key);

CREATE TABLE IF NOT EXISTS asset (
  id TEXT PRIMARY KEY,
  canvas_id TEXT NOT NULL,
  type TEXT NOT NULL,
  mime TEXT NOT NULL,
  size_bytes INTEGER NOT NULL,
  width INTEGER,
  height INTEGER,
  duration_ms INTEGER,
  url TEXT NOT NULL,
  thumbnail_url TEXT,
  meta_json TEXT NOT NULL,
  source_run_id TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS run_event (
  id TEXT PRIMARY KEY,
  run_id TEXT NOT NULL,
  seq INTEGER NOT NULL,
  type TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_run_event_run_id_seq ON run_event(run_id, seq);
"#;

/// SQLite-backed store. The pool supports concurrent callers; WAL mode keeps
/// the API and worker processes from blocking each other on reads.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Open (creating if missing) the database at `path`.
  pub async fn open(path: &Path) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(Self { pool })
  }

  /// Build a store from an existing pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
  async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
    Ok(())
  }

  async fn create_canvas(&self, canvas: &NewCanvas) -> Result<Canvas, StoreError> {
    let row = Canvas {
      id: canvas.id.clone(),
      name: canvas.name.clone(),
      graph_json: canvas.graph_json.clone(),
      version: 1,
      created_at: canvas.created_at,
      updated_at: canvas.updated_at,
    };
    sqlx::query(
      r#"
      INSERT INTO canvas (id, name, graph_json, version, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&row.id)
    .bind(&row.name)
    .bind(&row.graph_json)
    .bind(row.version)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&self.pool)
    .await
    .map_err(|err| match &err {
      sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists {
        id: canvas.id.clone(),
      },
      _ => StoreError::Database(err),
    })?;

    Ok(row)
  }

  async fn get_canvas(&self, id: &str) -> Result<Option<Canvas>, StoreError> {
    let row = sqlx::query_as(
      r#"
      SELECT id, name, graph_json, version, created_at, updated_at
      FROM canvas
      WHERE id = ?
      "#,
    )
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(row)
  }

  async fn update_canvas(
    &self,
    id: &str,
    graph_json: &str,
    expected_version: i64,
    updated_at: DateTime<Utc>,
  ) -> Result<CanvasVersion, StoreError> {
    // Single-statement compare-and-increment; concurrent callers race on the
    // version predicate, never on a read-then-write gap.
    let result = sqlx::query(
      r#"
      UPDATE canvas
      SET graph_json = ?, version = version + 1, updated_at = ?
      WHERE id = ? AND version = ?
      "#,
    )
    .bind(graph_json)
    .bind(updated_at)
    .bind(id)
    .bind(expected_version)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 1 {
      return Ok(CanvasVersion {
        id: id.to_string(),
        version: expected_version + 1,
        updated_at,
      });
    }

    let stored: Option<i64> = sqlx::query_scalar("SELECT version FROM canvas WHERE id = ?")
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    match stored {
      None => Err(StoreError::CanvasNotFound { id: id.to_string() }),
      Some(stored) => Err(StoreError::VersionConflict {
        id: id.to_string(),
        expected: expected_version,
        stored,
      }),
    }
  }

  async fn insert_run(&self, run: &NodeRun) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO node_run
        (id, canvas_id, node_id, node_type, status, trigger_source, idempotency_key,
         input_snapshot_json, params_snapshot_json, output_json, error_json, progress,
         parent_run_id, hop, created_at, started_at, finished_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&run.id)
    .bind(&run.canvas_id)
    .bind(&run.node_id)
    .bind(&run.node_type)
    .bind(run.status)
    .bind(run.trigger_source)
    .bind(&run.idempotency_key)
    .bind(&run.input_snapshot_json)
    .bind(&run.params_snapshot_json)
    .bind(&run.output_json)
    .bind(&run.error_json)
    .bind(run.progress)
    .bind(&run.parent_run_id)
    .bind(run.hop)
    .bind(run.created_at)
    .bind(run.started_at)
    .bind(run.finished_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn get_run(&self, id: &str) -> Result<Option<NodeRun>, StoreError> {
    let row = sqlx::query_as(
      r#"
      SELECT id, canvas_id, node_id, node_type, status, trigger_source, idempotency_key,
             input_snapshot_json, params_snapshot_json, output_json, error_json, progress,
             parent_run_id, hop, created_at, started_at, finished_at
      FROM node_run
      WHERE id = ?
      "#,
    )
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(row)
  }

  async fn update_run(&self, id: &str, patch: RunPatch) -> Result<(), StoreError> {
    // Terminal rows are excluded by the predicate, so late or retried writes
    // are no-ops without caller cooperation.
    sqlx::query(
      r#"
      UPDATE node_run
      SET status = COALESCE(?, status),
          progress = COALESCE(?, progress),
          output_json = COALESCE(?, output_json),
          error_json = COALESCE(?, error_json),
          started_at = COALESCE(?, started_at),
          finished_at = COALESCE(?, finished_at)
      WHERE id = ? AND status NOT IN ('succeeded', 'failed', 'canceled')
      "#,
    )
    .bind(patch.status)
    .bind(patch.progress)
    .bind(patch.output_json)
    .bind(patch.error_json)
    .bind(patch.started_at)
    .bind(patch.finished_at)
    .bind(id)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO asset
        (id, canvas_id, type, mime, size_bytes, width, height, duration_ms,
         url, thumbnail_url, meta_json, source_run_id, created_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&asset.id)
    .bind(&asset.canvas_id)
    .bind(asset.kind)
    .bind(&asset.mime)
    .bind(asset.size_bytes)
    .bind(asset.width)
    .bind(asset.height)
    .bind(asset.duration_ms)
    .bind(&asset.url)
    .bind(&asset.thumbnail_url)
    .bind(&asset.meta_json)
    .bind(&asset.source_run_id)
    .bind(asset.created_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn append_run_event(&self, event: &NewRunEvent) -> Result<RunEvent, StoreError> {
    // The seq subquery runs inside the INSERT, so assignment is atomic with
    // respect to concurrent appenders on the same run.
    let seq: i64 = sqlx::query_scalar(
      r#"
      INSERT INTO run_event (id, run_id, seq, type, payload_json, created_at)
      VALUES (?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM run_event WHERE run_id = ?), ?, ?, ?)
      RETURNING seq
      "#,
    )
    .bind(&event.id)
    .bind(&event.run_id)
    .bind(&event.run_id)
    .bind(&event.event_type)
    .bind(&event.payload_json)
    .bind(event.created_at)
    .fetch_one(&self.pool)
    .await?;

    Ok(RunEvent {
      id: event.id.clone(),
      run_id: event.run_id.clone(),
      seq,
      event_type: event.event_type.clone(),
      payload_json: event.payload_json.clone(),
      created_at: event.created_at,
    })
  }

  async fn list_run_events_after(
    &self,
    run_id: &str,
    after_seq: Option<i64>,
    limit: i64,
  ) -> Result<Vec<RunEvent>, StoreError> {
    let rows = sqlx::query_as(
      r#"
      SELECT id, run_id, seq, type, payload_json, created_at
      FROM run_event
      WHERE run_id = ? AND seq > ?
      ORDER BY seq ASC
      LIMIT ?
      "#,
    )
    .bind(run_id)
    .bind(after_seq.unwrap_or(0))
    .bind(limit)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }
}
