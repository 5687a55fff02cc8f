//! Easel Store
//!
//! This crate provides the storage trait and backends for canvases, node
//! runs, generated assets and the append-only run event log.
//!
//! Two interchangeable backends satisfy the same contract:
//! - [`SqliteStore`]: the primary backend (sqlx, WAL journal).
//! - [`FileStore`]: a single-file JSON fallback for environments where the
//!   SQLite file cannot be opened.
//!
//! [`open_store`] selects between them at startup; callers only ever see
//! `Arc<dyn Store>` and never branch on backend kind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

mod error;
mod file;
pub mod ids;
pub mod recorder;
mod sqlite;
mod types;

pub use error::StoreError;
pub use file::FileStore;
pub use sqlite::SqliteStore;
pub use types::{
  Asset, AssetKind, Canvas, CanvasVersion, NewCanvas, NewRunEvent, NodeRun, RunEvent, RunPatch,
  RunStatus, TriggerSource,
};

/// Storage contract shared by both backends.
///
/// Object-safe on purpose: the backend is chosen at startup and handed to
/// every component as `Arc<dyn Store>`.
#[async_trait]
pub trait Store: Send + Sync {
  /// Idempotent schema/file initialization. Safe to call on every startup.
  async fn migrate(&self) -> Result<(), StoreError>;

  /// Insert a canvas with `version = 1`. Fails with
  /// [`StoreError::AlreadyExists`] on id collision.
  async fn create_canvas(&self, canvas: &NewCanvas) -> Result<Canvas, StoreError>;

  async fn get_canvas(&self, id: &str) -> Result<Option<Canvas>, StoreError>;

  /// Atomic compare-and-increment over the canvas version.
  ///
  /// Succeeds only when `expected_version` equals the stored version at the
  /// time of the check-and-set; a mismatch returns
  /// [`StoreError::VersionConflict`] and leaves the row untouched.
  async fn update_canvas(
    &self,
    id: &str,
    graph_json: &str,
    expected_version: i64,
    updated_at: DateTime<Utc>,
  ) -> Result<CanvasVersion, StoreError>;

  async fn insert_run(&self, run: &NodeRun) -> Result<(), StoreError>;

  async fn get_run(&self, id: &str) -> Result<Option<NodeRun>, StoreError>;

  /// Merge `patch` into the run row.
  ///
  /// Silently a no-op when the run does not exist (it signals "already
  /// gone", not corruption) or has already reached a terminal status
  /// (idempotent retry safety).
  async fn update_run(&self, id: &str, patch: RunPatch) -> Result<(), StoreError>;

  async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError>;

  /// Append an event to the run's log, assigning the next per-run `seq`.
  async fn append_run_event(&self, event: &NewRunEvent) -> Result<RunEvent, StoreError>;

  /// Events for `run_id` with `seq` strictly greater than `after_seq` (or
  /// all, if `None`), ascending, capped at `limit`. The cursor-based
  /// pagination primitive the event feed depends on.
  async fn list_run_events_after(
    &self,
    run_id: &str,
    after_seq: Option<i64>,
    limit: i64,
  ) -> Result<Vec<RunEvent>, StoreError>;
}

/// Open the primary SQLite backend, falling back to the JSON file backend at
/// a derived path when it cannot be opened.
///
/// The fallback is a completely separate file, never the SQLite path, so a
/// half-written database is never fed to the wrong engine.
pub async fn open_store(db_path: &Path) -> Result<Arc<dyn Store>, StoreError> {
  match try_open_sqlite(db_path).await {
    Ok(store) => Ok(Arc::new(store)),
    Err(err) => {
      let json_path = fallback_path(db_path);
      warn!(
        error = %err,
        path = %json_path.display(),
        "sqlite store unavailable, falling back to file store"
      );
      let store = FileStore::open(&json_path).await?;
      store.migrate().await?;
      Ok(Arc::new(store))
    }
  }
}

async fn try_open_sqlite(db_path: &Path) -> Result<SqliteStore, StoreError> {
  let store = SqliteStore::open(db_path).await?;
  store.migrate().await?;
  Ok(store)
}

fn fallback_path(db_path: &Path) -> PathBuf {
  let name = db_path.file_name().and_then(|n| n.to_str()).unwrap_or("store");
  let stem = name
    .strip_suffix(".sqlite")
    .or_else(|| name.strip_suffix(".db"))
    .unwrap_or(name);
  db_path.with_file_name(format!("{stem}.json"))
}

#[cfg(test)]
mod tests {
  use super::fallback_path;
  use std::path::Path;

  #[test]
  fn fallback_path_derives_sibling_json_file() {
    assert_eq!(
      fallback_path(Path::new("/data/app.sqlite")),
      Path::new("/data/app.json")
    );
    assert_eq!(
      fallback_path(Path::new("/data/app.db")),
      Path::new("/data/app.json")
    );
    assert_eq!(
      fallback_path(Path::new("/data/app")),
      Path::new("/data/app.json")
    );
  }
}
