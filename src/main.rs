use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use easel_api::AppState;
use easel_queue::RunQueue;
use easel_store::open_store;
use easel_worker::{GeneratorRegistry, WorkerConfig, WorkerPool};

mod config;

use config::Config;

/// Easel - canvas generation studio backend
#[derive(Parser)]
#[command(name = "easel")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the HTTP API process
  Api,
  /// Run the queue-consumer worker process
  Worker,
  /// Initialize the store and queue files, then exit
  Migrate,
}

fn main() -> Result<()> {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  let config = Config::from_env()?;

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Commands::Api => rt.block_on(run_api(config)),
    Commands::Worker => rt.block_on(run_worker(config)),
    Commands::Migrate => rt.block_on(run_migrate(config)),
  }
}

async fn open_backends(config: &Config) -> Result<(Arc<dyn easel_store::Store>, RunQueue)> {
  if let Some(parent) = config.db_path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .context("failed to create data directory")?;
  }
  let store = open_store(&config.db_path)
    .await
    .context("failed to open store")?;
  let queue = RunQueue::open(&config.queue_path)
    .await
    .context("failed to open run queue")?;
  queue.migrate().await.context("failed to migrate run queue")?;
  Ok((store, queue))
}

async fn run_api(config: Config) -> Result<()> {
  let (store, queue) = open_backends(&config).await?;
  let state = AppState::new(store, queue).with_event_poll(config.event_poll);
  let router = easel_api::router(state);

  let listener = tokio::net::TcpListener::bind(config.api_addr)
    .await
    .with_context(|| format!("failed to bind {}", config.api_addr))?;
  info!(addr = %config.api_addr, "api listening");
  axum::serve(listener, router).await.context("api server failed")
}

async fn run_worker(config: Config) -> Result<()> {
  let (store, queue) = open_backends(&config).await?;
  let generators = Arc::new(GeneratorRegistry::with_builtins());
  let pool = WorkerPool::new(
    store,
    queue,
    generators,
    WorkerConfig {
      concurrency: config.worker_concurrency,
      ..Default::default()
    },
  );

  let shutdown = CancellationToken::new();
  let signal_token = shutdown.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("shutdown requested");
      signal_token.cancel();
    }
  });

  info!(concurrency = config.worker_concurrency, "worker started");
  pool.run(shutdown).await;
  info!("worker stopped");
  Ok(())
}

async fn run_migrate(config: Config) -> Result<()> {
  let (_store, _queue) = open_backends(&config).await?;
  info!(
    db = %config.db_path.display(),
    queue = %config.queue_path.display(),
    "store and queue initialized"
  );
  Ok(())
}
