//! Process configuration from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Settings shared by the `api` and `worker` subcommands. Every value has a
/// default suitable for local development.
#[derive(Debug, Clone)]
pub struct Config {
  /// Primary store path; the file-backend fallback derives a sibling `.json`.
  pub db_path: PathBuf,
  /// Queue broker file; always separate from the store.
  pub queue_path: PathBuf,
  pub api_addr: SocketAddr,
  pub worker_concurrency: usize,
  pub event_poll: Duration,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Ok(Self {
      db_path: var_or("EASEL_DB_PATH", "./data/easel.sqlite").into(),
      queue_path: var_or("EASEL_QUEUE_PATH", "./data/easel-queue.sqlite").into(),
      api_addr: var_or("EASEL_API_ADDR", "127.0.0.1:8787")
        .parse()
        .context("EASEL_API_ADDR is not a valid socket address")?,
      worker_concurrency: var_or("EASEL_WORKER_CONCURRENCY", "2")
        .parse()
        .context("EASEL_WORKER_CONCURRENCY is not a valid integer")?,
      event_poll: Duration::from_millis(
        var_or("EASEL_EVENT_POLL_MS", "500")
          .parse()
          .context("EASEL_EVENT_POLL_MS is not a valid integer")?,
      ),
    })
  }
}

fn var_or(key: &str, default: &str) -> String {
  std::env::var(key).unwrap_or_else(|_| default.to_string())
}
