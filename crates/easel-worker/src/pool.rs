//! Worker pool.
//!
//! N independent claim loops over the run queue. Each slot claims one
//! message at a time, executes the run, and completes or fails the job.
//! Slots share nothing but the store and the queue.

use std::sync::Arc;
use std::time::Duration;

use easel_queue::RunQueue;
use easel_store::Store;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::executor::RunExecutor;
use crate::generator::GeneratorRegistry;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Number of concurrent execution slots.
  pub concurrency: usize,
  /// Idle sleep between empty queue polls.
  pub poll_interval: Duration,
  /// Visibility timeout granted per claim; the only safety net against a
  /// claimant that dies mid-run.
  pub visibility: Duration,
  /// Attempts before a message is dropped from the broker.
  pub max_attempts: i64,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      concurrency: 2,
      poll_interval: Duration::from_millis(500),
      visibility: Duration::from_secs(60),
      max_attempts: 5,
    }
  }
}

/// The queue-consumer process body.
pub struct WorkerPool {
  executor: Arc<RunExecutor>,
  queue: RunQueue,
  config: WorkerConfig,
}

impl WorkerPool {
  pub fn new(
    store: Arc<dyn Store>,
    queue: RunQueue,
    generators: Arc<GeneratorRegistry>,
    config: WorkerConfig,
  ) -> Self {
    Self {
      executor: Arc::new(RunExecutor::new(store, generators)),
      queue,
      config,
    }
  }

  /// Run all slots until `shutdown` fires. In-flight jobs finish before the
  /// pool returns; jobs interrupted by a hard crash instead come back via
  /// queue redelivery.
  pub async fn run(&self, shutdown: CancellationToken) {
    let mut handles = Vec::new();
    for slot in 0..self.config.concurrency.max(1) {
      let executor = Arc::clone(&self.executor);
      let queue = self.queue.clone();
      let config = self.config.clone();
      let shutdown = shutdown.clone();
      handles.push(tokio::spawn(slot_loop(slot, executor, queue, config, shutdown)));
    }
    for handle in handles {
      let _ = handle.await;
    }
  }
}

async fn slot_loop(
  slot: usize,
  executor: Arc<RunExecutor>,
  queue: RunQueue,
  config: WorkerConfig,
  shutdown: CancellationToken,
) {
  info!(slot, "worker slot started");
  while !shutdown.is_cancelled() {
    let job = match queue.claim(config.visibility, config.max_attempts).await {
      Ok(job) => job,
      Err(err) => {
        error!(slot, error = %err, "queue claim failed");
        idle(&shutdown, config.poll_interval).await;
        continue;
      }
    };

    let Some(job) = job else {
      idle(&shutdown, config.poll_interval).await;
      continue;
    };

    info!(slot, job_id = job.id, run_id = %job.run_id, attempt = job.attempts, "claimed job");
    // Per-job token: the cancel transition is a contract for callers, not
    // something shutdown triggers. Shutdown waits for in-flight jobs.
    let cancel = CancellationToken::new();
    match executor.execute(&job.run_id, &cancel).await {
      Ok(()) => {
        if let Err(err) = queue.complete(job.id).await {
          error!(slot, job_id = job.id, error = %err, "failed to complete job");
        }
      }
      Err(err) => {
        error!(slot, job_id = job.id, run_id = %job.run_id, error = %err, "job attempt failed");
        if let Err(err) = queue.fail(job.id, config.max_attempts).await {
          error!(slot, job_id = job.id, error = %err, "failed to release job");
        }
      }
    }
  }
  info!(slot, "worker slot stopped");
}

async fn idle(shutdown: &CancellationToken, interval: Duration) {
  tokio::select! {
    _ = shutdown.cancelled() => {}
    _ = sleep(interval) => {}
  }
}
