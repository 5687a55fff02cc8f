//! Shared handler state.

use std::sync::Arc;
use std::time::Duration;

use easel_queue::RunQueue;
use easel_store::Store;

/// State handed to every handler. The store and queue are the only shared
/// mutable resources in the system.
#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn Store>,
  pub queue: RunQueue,
  /// Interval between event-feed polls of the store.
  pub event_poll: Duration,
}

impl AppState {
  pub fn new(store: Arc<dyn Store>, queue: RunQueue) -> Self {
    Self {
      store,
      queue,
      event_poll: Duration::from_millis(500),
    }
  }

  pub fn with_event_poll(mut self, event_poll: Duration) -> Self {
    self.event_poll = event_poll;
    self
  }
}
