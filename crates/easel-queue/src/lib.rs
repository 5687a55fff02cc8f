//! Easel Queue
//!
//! Durable, at-least-once FIFO work queue carrying one message per run. The
//! API process enqueues after persisting the run row and its `run.created`
//! event; the worker claims messages with a visibility timeout, so a claimant
//! that dies without completing has its message redelivered.
//!
//! The broker is a SQLite file of its own, never the store's database file.
//! Both sides treat it as append/claim/remove only.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS run_queue (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id TEXT NOT NULL,
  attempts INTEGER NOT NULL DEFAULT 0,
  enqueued_at INTEGER NOT NULL,
  visible_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_run_queue_visible_at ON run_queue(visible_at);
"#;

/// Errors that can occur during queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  #[error("queue database error")]
  Database(#[from] sqlx::Error),
}

/// A claimed queue message.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
  pub id: i64,
  pub run_id: String,
  pub attempts: i64,
}

/// Handle to the run queue. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct RunQueue {
  pool: SqlitePool,
}

impl RunQueue {
  /// Open (creating if missing) the queue file at `path`.
  pub async fn open(path: &Path) -> Result<Self, QueueError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(Self { pool })
  }

  /// Idempotent schema initialization. Safe to call on every startup.
  pub async fn migrate(&self) -> Result<(), QueueError> {
    sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
    Ok(())
  }

  /// Enqueue one message for `run_id`, visible immediately.
  pub async fn enqueue(&self, run_id: &str) -> Result<(), QueueError> {
    let now = Utc::now().timestamp_millis();
    sqlx::query("INSERT INTO run_queue (run_id, attempts, enqueued_at, visible_at) VALUES (?, 0, ?, ?)")
      .bind(run_id)
      .bind(now)
      .bind(now)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  /// Claim the oldest visible message, if any.
  ///
  /// Bumps the attempt count and pushes `visible_at` forward by `visibility`;
  /// if the claimant never completes or fails the job, the message becomes
  /// visible again after the timeout and is redelivered. Messages whose
  /// attempt count already reached `max_attempts` are removed instead of
  /// redelivered, so a claimant that dies without failing the job cannot make
  /// a message circulate forever.
  pub async fn claim(
    &self,
    visibility: Duration,
    max_attempts: i64,
  ) -> Result<Option<Job>, QueueError> {
    let now = Utc::now().timestamp_millis();
    let next_visible = now + visibility.as_millis() as i64;
    let purged = sqlx::query("DELETE FROM run_queue WHERE visible_at <= ? AND attempts >= ?")
      .bind(now)
      .bind(max_attempts)
      .execute(&self.pool)
      .await?;
    if purged.rows_affected() > 0 {
      tracing::warn!(
        purged = purged.rows_affected(),
        max_attempts,
        "dropping poison messages that exhausted their attempts"
      );
    }
    // Single statement; SQLite serializes writers, so two claimants can
    // never take the same row.
    let job = sqlx::query_as(
      r#"
      UPDATE run_queue
      SET attempts = attempts + 1, visible_at = ?
      WHERE id = (SELECT id FROM run_queue WHERE visible_at <= ? ORDER BY id LIMIT 1)
        AND visible_at <= ?
      RETURNING id, run_id, attempts
      "#,
    )
    .bind(next_visible)
    .bind(now)
    .bind(now)
    .fetch_optional(&self.pool)
    .await?;
    Ok(job)
  }

  /// Remove a message after successful completion.
  pub async fn complete(&self, job_id: i64) -> Result<(), QueueError> {
    sqlx::query("DELETE FROM run_queue WHERE id = ?")
      .bind(job_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  /// Record a failed attempt.
  ///
  /// Messages that have reached `max_attempts` are removed (bounded
  /// retention); anything younger becomes visible again immediately.
  pub async fn fail(&self, job_id: i64, max_attempts: i64) -> Result<(), QueueError> {
    let removed = sqlx::query("DELETE FROM run_queue WHERE id = ? AND attempts >= ?")
      .bind(job_id)
      .bind(max_attempts)
      .execute(&self.pool)
      .await?;
    if removed.rows_affected() > 0 {
      tracing::warn!(job_id, max_attempts, "dropping job after repeated failures");
      return Ok(());
    }
    let now = Utc::now().timestamp_millis();
    sqlx::query("UPDATE run_queue SET visible_at = ? WHERE id = ?")
      .bind(now)
      .bind(job_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  /// Number of messages currently in the broker, visible or not.
  pub async fn depth(&self) -> Result<i64, QueueError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM run_queue")
      .fetch_one(&self.pool)
      .await?;
    Ok(count)
  }
}
