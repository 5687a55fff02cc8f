//! JSON file backend.
//!
//! Fallback for environments where the SQLite file cannot be opened. The
//! whole store is one JSON document loaded and rewritten per operation, so a
//! second process sees committed writes on its next load. A mutex serializes
//! all access within the process; the document is written via temp file +
//! rename so a crash mid-save never truncates it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{
  Asset, Canvas, CanvasVersion, NewCanvas, NewRunEvent, NodeRun, RunEvent, RunPatch,
};
use crate::Store;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileDb {
  #[serde(default)]
  canvases: BTreeMap<String, Canvas>,
  #[serde(default)]
  runs: BTreeMap<String, NodeRun>,
  #[serde(default)]
  assets: BTreeMap<String, Asset>,
  #[serde(default)]
  events: Vec<RunEvent>,
}

/// Single-file JSON store.
pub struct FileStore {
  path: PathBuf,
  lock: Mutex<()>,
}

impl FileStore {
  /// Open (creating if missing) the JSON document at `path`.
  pub async fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let store = Self {
      path: path.to_path_buf(),
      lock: Mutex::new(()),
    };
    Ok(store)
  }

  async fn load(&self) -> Result<FileDb, StoreError> {
    match tokio::fs::read_to_string(&self.path).await {
      Ok(raw) => Ok(serde_json::from_str(&raw)?),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FileDb::default()),
      Err(err) => Err(err.into()),
    }
  }

  async fn save(&self, db: &FileDb) -> Result<(), StoreError> {
    let raw = serde_json::to_string_pretty(db)?;
    let tmp = self.path.with_extension("json.tmp");
    tokio::fs::write(&tmp, raw).await?;
    tokio::fs::rename(&tmp, &self.path).await?;
    Ok(())
  }
}

#[async_trait::async_trait]
impl Store for FileStore {
  async fn migrate(&self) -> Result<(), StoreError> {
    let _guard = self.lock.lock().await;
    if tokio::fs::try_exists(&self.path).await? {
      return Ok(());
    }
    self.save(&FileDb::default()).await
  }

  async fn create_canvas(&self, canvas: &NewCanvas) -> Result<Canvas, StoreError> {
    let _guard = self.lock.lock().await;
    let mut db = self.load().await?;
    if db.canvases.contains_key(&canvas.id) {
      return Err(StoreError::AlreadyExists {
        id: canvas.id.clone(),
      });
    }
    let row = Canvas {
      id: canvas.id.clone(),
      name: canvas.name.clone(),
      graph_json: canvas.graph_json.clone(),
      version: 1,
      created_at: canvas.created_at,
      updated_at: canvas.updated_at,
    };
    db.canvases.insert(row.id.clone(), row.clone());
    self.save(&db).await?;
    Ok(row)
  }

  async fn get_canvas(&self, id: &str) -> Result<Option<Canvas>, StoreError> {
    let _guard = self.lock.lock().await;
    let db = self.load().await?;
    Ok(db.canvases.get(id).cloned())
  }

  async fn update_canvas(
    &self,
    id: &str,
    graph_json: &str,
    expected_version: i64,
    updated_at: DateTime<Utc>,
  ) -> Result<CanvasVersion, StoreError> {
    // The compare-and-swap is load/compare/store, serialized by the store
    // mutex (the whole backend is single-writer).
    let _guard = self.lock.lock().await;
    let mut db = self.load().await?;
    let Some(existing) = db.canvases.get_mut(id) else {
      return Err(StoreError::CanvasNotFound { id: id.to_string() });
    };
    if existing.version != expected_version {
      return Err(StoreError::VersionConflict {
        id: id.to_string(),
        expected: expected_version,
        stored: existing.version,
      });
    }
    existing.graph_json = graph_json.to_string();
    existing.version += 1;
    existing.updated_at = updated_at;
    let version = existing.version;
    self.save(&db).await?;
    Ok(CanvasVersion {
      id: id.to_string(),
      version,
      updated_at,
    })
  }

  async fn insert_run(&self, run: &NodeRun) -> Result<(), StoreError> {
    let _guard = self.lock.lock().await;
    let mut db = self.load().await?;
    db.runs.insert(run.id.clone(), run.clone());
    self.save(&db).await
  }

  async fn get_run(&self, id: &str) -> Result<Option<NodeRun>, StoreError> {
    let _guard = self.lock.lock().await;
    let db = self.load().await?;
    Ok(db.runs.get(id).cloned())
  }

  async fn update_run(&self, id: &str, patch: RunPatch) -> Result<(), StoreError> {
    let _guard = self.lock.lock().await;
    let mut db = self.load().await?;
    let Some(existing) = db.runs.get_mut(id) else {
      return Ok(());
    };
    if existing.status.is_terminal() {
      return Ok(());
    }
    if let Some(status) = patch.status {
      existing.status = status;
    }
    if let Some(progress) = patch.progress {
      existing.progress = progress;
    }
    if let Some(output_json) = patch.output_json {
      existing.output_json = Some(output_json);
    }
    if let Some(error_json) = patch.error_json {
      existing.error_json = Some(error_json);
    }
    if let Some(started_at) = patch.started_at {
      existing.started_at = Some(started_at);
    }
    if let Some(finished_at) = patch.finished_at {
      existing.finished_at = Some(finished_at);
    }
    self.save(&db).await
  }

  async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
    let _guard = self.lock.lock().await;
    let mut db = self.load().await?;
    db.assets.insert(asset.id.clone(), asset.clone());
    self.save(&db).await
  }

  async fn append_run_event(&self, event: &NewRunEvent) -> Result<RunEvent, StoreError> {
    let _guard = self.lock.lock().await;
    let mut db = self.load().await?;
    let seq = db
      .events
      .iter()
      .filter(|e| e.run_id == event.run_id)
      .map(|e| e.seq)
      .max()
      .unwrap_or(0)
      + 1;
    let row = RunEvent {
      id: event.id.clone(),
      run_id: event.run_id.clone(),
      seq,
      event_type: event.event_type.clone(),
      payload_json: event.payload_json.clone(),
      created_at: event.created_at,
    };
    db.events.push(row.clone());
    self.save(&db).await?;
    Ok(row)
  }

  async fn list_run_events_after(
    &self,
    run_id: &str,
    after_seq: Option<i64>,
    limit: i64,
  ) -> Result<Vec<RunEvent>, StoreError> {
    let _guard = self.lock.lock().await;
    let db = self.load().await?;
    let after = after_seq.unwrap_or(0);
    let mut events: Vec<RunEvent> = db
      .events
      .iter()
      .filter(|e| e.run_id == run_id && e.seq > after)
      .cloned()
      .collect();
    events.sort_by_key(|e| e.seq);
    events.truncate(limit.max(0) as usize);
    Ok(events)
  }
}
