//! Easel Worker
//!
//! The queue-consumer side of the run pipeline: a pool of execution slots
//! pulls one message per slot from the run queue and drives the referenced
//! run through its state machine, recording progress events and producing an
//! asset on success.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//! └── slot_loop (×N) - claim / execute / complete-or-fail
//!
//! RunExecutor
//! └── execute(run_id) - queued → running → succeeded | failed | canceled
//!
//! Generator (trait)
//! └── generate(run) - node-type-specific backend, progress via reporter
//! ```

mod error;
mod executor;
mod generator;
mod pool;

pub use error::ExecuteError;
pub use executor::RunExecutor;
pub use generator::{
  AssetDraft, Generator, GeneratorError, GeneratorRegistry, ProgressReporter, ProgressUpdate,
  SimulateGenerator, SIMULATE_NODE_TYPE,
};
pub use pool::{WorkerConfig, WorkerPool};
