//! Easel API
//!
//! The HTTP surface the editor talks to: canvas documents under optimistic
//! concurrency control, run creation (persist, record, then enqueue), run
//! lookup, and a per-run SSE event feed with replay-then-poll delivery.
//!
//! The API process never mutates a run after creating it; all lifecycle
//! writes belong to the worker, and the two meet only in the store and the
//! queue.

use axum::routing::{get, post};
use axum::Router;

mod canvas;
mod error;
mod health;
mod run;
mod state;

pub use error::ApiError;
pub use state::AppState;

/// Build the API router.
pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/health", get(health::health))
    .route("/api/canvases", post(canvas::create_canvas))
    .route(
      "/api/canvases/{id}",
      get(canvas::get_canvas).put(canvas::update_canvas),
    )
    .route(
      "/api/canvases/{canvas_id}/nodes/{node_id}/run",
      post(run::create_run),
    )
    .route("/api/runs/{run_id}", get(run::get_run))
    .route("/api/runs/{run_id}/events", get(run::run_events))
    .with_state(state)
}
