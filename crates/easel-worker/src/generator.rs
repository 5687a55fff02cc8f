//! Generation backends.
//!
//! A [`Generator`] is the pluggable boundary to an actual image/video engine.
//! The registry is constructed explicitly at startup and handed to the
//! components that need it; there is no global state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use easel_store::{ids, AssetKind, NodeRun};
use tokio::sync::mpsc;

/// Node type served by the built-in simulated backend.
pub const SIMULATE_NODE_TYPE: &str = "demo.simulate.v1";

/// A generation backend failure, carried into the run's `error_json`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct GeneratorError {
  pub message: String,
}

impl GeneratorError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// A progress tick reported by a generator.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
  pub progress: i64,
  pub message: String,
}

/// Handle a generator uses to report progress ticks back to the executor.
#[derive(Clone)]
pub struct ProgressReporter {
  tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
  pub(crate) fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
    Self { tx }
  }

  /// Report a progress tick. A closed executor side is not an error for the
  /// generator; the tick is simply dropped.
  pub async fn report(&self, progress: i64, message: impl Into<String>) {
    let _ = self
      .tx
      .send(ProgressUpdate {
        progress,
        message: message.into(),
      })
      .await;
  }
}

/// The produced artifact, before the executor assigns it an asset id and
/// persists it.
#[derive(Debug, Clone)]
pub struct AssetDraft {
  pub kind: AssetKind,
  pub mime: String,
  pub size_bytes: i64,
  pub width: Option<i64>,
  pub height: Option<i64>,
  pub duration_ms: Option<i64>,
  pub url: String,
  pub thumbnail_url: Option<String>,
  pub meta: serde_json::Value,
}

/// A generation backend for one node type.
#[async_trait]
pub trait Generator: Send + Sync {
  /// Produce the run's artifact, reporting progress along the way.
  async fn generate(
    &self,
    run: &NodeRun,
    progress: ProgressReporter,
  ) -> Result<AssetDraft, GeneratorError>;
}

/// Maps node types to their generation backends.
#[derive(Default)]
pub struct GeneratorRegistry {
  generators: HashMap<String, Arc<dyn Generator>>,
}

impl GeneratorRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, node_type: impl Into<String>, generator: Arc<dyn Generator>) {
    self.generators.insert(node_type.into(), generator);
  }

  pub fn get(&self, node_type: &str) -> Option<Arc<dyn Generator>> {
    self.generators.get(node_type).cloned()
  }

  /// Registry with the built-in simulated backend, as used by the worker
  /// binary.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register(SIMULATE_NODE_TYPE, Arc::new(SimulateGenerator::default()));
    registry
  }
}

/// Simulated backend: fixed-step progress ticks and a placeholder image URL.
/// Keeps the whole run pipeline exercisable without a real engine behind it.
pub struct SimulateGenerator {
  step_delay: Duration,
}

impl SimulateGenerator {
  pub fn new(step_delay: Duration) -> Self {
    Self { step_delay }
  }
}

impl Default for SimulateGenerator {
  fn default() -> Self {
    Self::new(Duration::from_millis(300))
  }
}

#[async_trait]
impl Generator for SimulateGenerator {
  async fn generate(
    &self,
    _run: &NodeRun,
    progress: ProgressReporter,
  ) -> Result<AssetDraft, GeneratorError> {
    for step in (10..=90).step_by(20) {
      tokio::time::sleep(self.step_delay).await;
      progress.report(step, "simulating").await;
    }

    Ok(AssetDraft {
      kind: AssetKind::Image,
      mime: "image/png".to_string(),
      size_bytes: 0,
      width: None,
      height: None,
      duration_ms: None,
      url: format!("https://assets.easel.invalid/{}.png", ids::new_id()),
      thumbnail_url: None,
      meta: serde_json::json!({ "note": "simulated output" }),
    })
  }
}
