//! Run execution.
//!
//! Drives one run through its state machine. Every transition is persisted
//! to the store first and its event appended after the write commits, so
//! observers can lag but the run row is always the source of truth.

use std::sync::Arc;

use easel_store::recorder::{
  self, AssetCreatedPayload, AssetRef, RunCanceledPayload, RunEventType, RunFailedPayload,
  RunOutputs, RunProgressPayload, RunStartedPayload, RunSucceededPayload,
};
use easel_store::{ids, Asset, NodeRun, RunPatch, RunStatus, Store, StoreError};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::ExecuteError;
use crate::generator::{
  AssetDraft, GeneratorError, GeneratorRegistry, ProgressReporter, ProgressUpdate,
};

/// Executes claimed run jobs against the store.
pub struct RunExecutor {
  store: Arc<dyn Store>,
  generators: Arc<GeneratorRegistry>,
}

impl RunExecutor {
  pub fn new(store: Arc<dyn Store>, generators: Arc<GeneratorRegistry>) -> Self {
    Self { store, generators }
  }

  /// Execute one run to a terminal state.
  ///
  /// Returns `Err` only when the store itself rejects a write; that attempt
  /// is retried via queue redelivery. Every other failure is recorded on the
  /// run (`failed` or `canceled`) and the job is considered handled. A
  /// missing run row is logged and dropped; it signals out-of-band deletion,
  /// not corruption.
  #[instrument(name = "run_execute", skip(self, cancel), fields(run_id = %run_id))]
  pub async fn execute(&self, run_id: &str, cancel: &CancellationToken) -> Result<(), ExecuteError> {
    let Some(run) = self.store.get_run(run_id).await? else {
      warn!("run row missing, dropping job");
      return Ok(());
    };
    if run.status.is_terminal() {
      info!(status = run.status.as_str(), "run already terminal, skipping");
      return Ok(());
    }
    if cancel.is_cancelled() {
      return self.finish_canceled(&run).await;
    }

    let started_at = ids::now();
    self
      .store
      .update_run(
        &run.id,
        RunPatch {
          status: Some(RunStatus::Running),
          started_at: Some(started_at),
          ..Default::default()
        },
      )
      .await?;
    recorder::record(
      self.store.as_ref(),
      &run.id,
      RunEventType::RunStarted,
      &RunStartedPayload {
        run_id: run.id.clone(),
        started_at,
      },
    )
    .await?;

    match self.drive(&run, cancel).await {
      Ok(draft) => self.finish_succeeded(&run, draft).await,
      Err(ExecuteError::Canceled) => self.finish_canceled(&run).await,
      Err(ExecuteError::Store(err)) => Err(ExecuteError::Store(err)),
      Err(err) => self.finish_failed(&run, &err).await,
    }
  }

  /// Run the generator, persisting progress ticks as they arrive.
  async fn drive(
    &self,
    run: &NodeRun,
    cancel: &CancellationToken,
  ) -> Result<AssetDraft, ExecuteError> {
    let generator =
      self
        .generators
        .get(&run.node_type)
        .ok_or_else(|| ExecuteError::UnknownNodeType {
          node_type: run.node_type.clone(),
        })?;

    let (tx, mut rx) = mpsc::channel::<ProgressUpdate>(16);
    let reporter = ProgressReporter::new(tx);
    // The generator runs in its own task: a panicking backend is contained
    // there and surfaces as a join error, so the slot loop survives and the
    // run still reaches `failed` instead of sticking in `running`.
    let generator_run = run.clone();
    let mut generate =
      tokio::spawn(async move { generator.generate(&generator_run, reporter).await });

    let mut last_progress = run.progress;
    let draft = loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          generate.abort();
          return Err(ExecuteError::Canceled);
        }
        Some(update) = rx.recv() => {
          self.record_progress(run, &mut last_progress, update).await?;
        }
        result = &mut generate => {
          break Self::joined_draft(result)?;
        }
      }
    };

    // Ticks buffered at completion time are still part of the log and must
    // land before asset.created.
    while let Ok(update) = rx.try_recv() {
      self.record_progress(run, &mut last_progress, update).await?;
    }

    Ok(draft)
  }

  fn joined_draft(
    result: Result<Result<AssetDraft, GeneratorError>, JoinError>,
  ) -> Result<AssetDraft, ExecuteError> {
    match result {
      Ok(result) => result.map_err(ExecuteError::Generator),
      Err(err) => {
        let message = match err.try_into_panic() {
          Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
          Err(err) => err.to_string(),
        };
        Err(ExecuteError::GeneratorPanic { message })
      }
    }
  }

  async fn record_progress(
    &self,
    run: &NodeRun,
    last_progress: &mut i64,
    update: ProgressUpdate,
  ) -> Result<(), ExecuteError> {
    // Progress is monotonically non-decreasing; stale or overshooting ticks
    // are dropped.
    if update.progress <= *last_progress || update.progress >= 100 {
      return Ok(());
    }
    *last_progress = update.progress;
    self
      .store
      .update_run(
        &run.id,
        RunPatch {
          progress: Some(update.progress),
          ..Default::default()
        },
      )
      .await?;
    recorder::record(
      self.store.as_ref(),
      &run.id,
      RunEventType::RunProgress,
      &RunProgressPayload {
        run_id: run.id.clone(),
        progress: update.progress,
        message: update.message,
      },
    )
    .await?;
    Ok(())
  }

  async fn finish_succeeded(&self, run: &NodeRun, draft: AssetDraft) -> Result<(), ExecuteError> {
    let asset_id = ids::new_id();
    let created_at = ids::now();
    let asset = Asset {
      id: asset_id.clone(),
      canvas_id: run.canvas_id.clone(),
      kind: draft.kind,
      mime: draft.mime,
      size_bytes: draft.size_bytes,
      width: draft.width,
      height: draft.height,
      duration_ms: draft.duration_ms,
      url: draft.url,
      thumbnail_url: draft.thumbnail_url,
      meta_json: serde_json::to_string(&draft.meta).map_err(StoreError::from)?,
      source_run_id: run.id.clone(),
      created_at,
    };
    self.store.insert_asset(&asset).await?;
    recorder::record(
      self.store.as_ref(),
      &run.id,
      RunEventType::AssetCreated,
      &AssetCreatedPayload {
        run_id: run.id.clone(),
        asset: AssetRef {
          id: asset.id.clone(),
          kind: asset.kind,
          url: asset.url.clone(),
        },
      },
    )
    .await?;

    let outputs = RunOutputs {
      assets: vec![asset_id.clone()],
      by_port: [("output".to_string(), vec![asset_id])].into(),
    };
    let finished_at = ids::now();
    self
      .store
      .update_run(
        &run.id,
        RunPatch {
          status: Some(RunStatus::Succeeded),
          progress: Some(100),
          output_json: Some(serde_json::to_string(&outputs).map_err(StoreError::from)?),
          finished_at: Some(finished_at),
          ..Default::default()
        },
      )
      .await?;
    recorder::record(
      self.store.as_ref(),
      &run.id,
      RunEventType::RunSucceeded,
      &RunSucceededPayload {
        run_id: run.id.clone(),
        finished_at,
        outputs,
      },
    )
    .await?;

    info!(run_id = %run.id, "run succeeded");
    Ok(())
  }

  async fn finish_failed(&self, run: &NodeRun, cause: &ExecuteError) -> Result<(), ExecuteError> {
    let message = cause.to_string();
    let finished_at = ids::now();
    self
      .store
      .update_run(
        &run.id,
        RunPatch {
          status: Some(RunStatus::Failed),
          error_json: Some(
            serde_json::to_string(&serde_json::json!({ "message": message }))
              .map_err(StoreError::from)?,
          ),
          finished_at: Some(finished_at),
          ..Default::default()
        },
      )
      .await?;
    recorder::record(
      self.store.as_ref(),
      &run.id,
      RunEventType::RunFailed,
      &RunFailedPayload {
        run_id: run.id.clone(),
        message: message.clone(),
        finished_at,
      },
    )
    .await?;

    error!(run_id = %run.id, error = %message, "run failed");
    Ok(())
  }

  async fn finish_canceled(&self, run: &NodeRun) -> Result<(), ExecuteError> {
    let finished_at = ids::now();
    self
      .store
      .update_run(
        &run.id,
        RunPatch {
          status: Some(RunStatus::Canceled),
          finished_at: Some(finished_at),
          ..Default::default()
        },
      )
      .await?;
    recorder::record(
      self.store.as_ref(),
      &run.id,
      RunEventType::RunCanceled,
      &RunCanceledPayload {
        run_id: run.id.clone(),
        finished_at,
      },
    )
    .await?;

    warn!(run_id = %run.id, "run canceled");
    Ok(())
  }
}
