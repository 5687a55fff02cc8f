//! Execution errors.

use easel_store::StoreError;

use crate::generator::GeneratorError;

/// Errors that can occur while executing a run.
///
/// Only [`ExecuteError::Store`] escapes the job boundary (the attempt is
/// retried by the queue); everything else is converted into a terminal
/// `failed` or `canceled` run by the executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
  /// No generator registered for the run's node type.
  #[error("no generator registered for node type '{node_type}'")]
  UnknownNodeType { node_type: String },

  /// The generation backend failed.
  #[error("generation failed: {0}")]
  Generator(#[source] GeneratorError),

  /// The generation backend panicked; contained at the job boundary.
  #[error("generation panicked: {message}")]
  GeneratorPanic { message: String },

  /// Execution was canceled between steps.
  #[error("execution canceled")]
  Canceled,

  /// The store rejected a write.
  #[error(transparent)]
  Store(#[from] StoreError),
}
