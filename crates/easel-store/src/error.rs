//! Storage errors.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// A row with the same id already exists.
  #[error("canvas '{id}' already exists")]
  AlreadyExists { id: String },

  /// Canvas not found.
  #[error("canvas '{id}' not found")]
  CanvasNotFound { id: String },

  /// Optimistic-version mismatch on a canvas update. Recoverable by
  /// refetch-and-retry; the stored row was not touched.
  #[error("canvas '{id}' version conflict: expected {expected}, stored {stored}")]
  VersionConflict {
    id: String,
    expected: i64,
    stored: i64,
  },

  /// SQLite backend failure.
  #[error("database error")]
  Database(#[from] sqlx::Error),

  /// File backend i/o failure.
  #[error("file store i/o error")]
  Io(#[from] std::io::Error),

  /// JSON encoding or decoding failure.
  #[error("json error")]
  Json(#[from] serde_json::Error),
}
