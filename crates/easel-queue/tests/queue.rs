//! Queue semantics: FIFO claims, visibility-timeout redelivery, bounded
//! attempts.

use std::time::Duration;

use easel_queue::RunQueue;
use tempfile::TempDir;

async fn open_queue(dir: &TempDir) -> RunQueue {
  let queue = RunQueue::open(&dir.path().join("queue.sqlite"))
    .await
    .expect("open queue");
  queue.migrate().await.expect("migrate queue");
  queue
}

#[tokio::test]
async fn claims_in_fifo_order() {
  let dir = TempDir::new().unwrap();
  let queue = open_queue(&dir).await;
  queue.enqueue("run-1").await.unwrap();
  queue.enqueue("run-2").await.unwrap();

  let first = queue.claim(Duration::from_secs(60), 5).await.unwrap().unwrap();
  assert_eq!(first.run_id, "run-1");
  assert_eq!(first.attempts, 1);

  let second = queue.claim(Duration::from_secs(60), 5).await.unwrap().unwrap();
  assert_eq!(second.run_id, "run-2");

  assert!(queue.claim(Duration::from_secs(60), 5).await.unwrap().is_none());
}

#[tokio::test]
async fn complete_removes_the_message() {
  let dir = TempDir::new().unwrap();
  let queue = open_queue(&dir).await;
  queue.enqueue("run-1").await.unwrap();

  let job = queue.claim(Duration::from_secs(60), 5).await.unwrap().unwrap();
  queue.complete(job.id).await.unwrap();

  assert!(queue.claim(Duration::from_secs(60), 5).await.unwrap().is_none());
  assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn redelivers_after_visibility_timeout() {
  let dir = TempDir::new().unwrap();
  let queue = open_queue(&dir).await;
  queue.enqueue("run-1").await.unwrap();

  let first = queue.claim(Duration::from_millis(20), 5).await.unwrap().unwrap();
  assert_eq!(first.attempts, 1);
  // Claimed and invisible: nothing to take until the timeout expires.
  assert!(queue.claim(Duration::from_secs(60), 5).await.unwrap().is_none());

  tokio::time::sleep(Duration::from_millis(50)).await;

  let redelivered = queue.claim(Duration::from_secs(60), 5).await.unwrap().unwrap();
  assert_eq!(redelivered.id, first.id);
  assert_eq!(redelivered.run_id, "run-1");
  assert_eq!(redelivered.attempts, 2);
}

#[tokio::test]
async fn claim_drops_messages_that_exhausted_their_attempts() {
  let dir = TempDir::new().unwrap();
  let queue = open_queue(&dir).await;
  queue.enqueue("run-1").await.unwrap();

  // Two claimants die without completing or failing the job.
  let first = queue.claim(Duration::from_millis(10), 2).await.unwrap().unwrap();
  assert_eq!(first.attempts, 1);
  tokio::time::sleep(Duration::from_millis(30)).await;
  let second = queue.claim(Duration::from_millis(10), 2).await.unwrap().unwrap();
  assert_eq!(second.attempts, 2);
  tokio::time::sleep(Duration::from_millis(30)).await;

  // The bound holds on redelivery too, not only through fail().
  assert!(queue.claim(Duration::from_secs(60), 2).await.unwrap().is_none());
  assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn fail_retries_until_attempts_exhausted() {
  let dir = TempDir::new().unwrap();
  let queue = open_queue(&dir).await;
  queue.enqueue("run-1").await.unwrap();

  let job = queue.claim(Duration::from_secs(60), 5).await.unwrap().unwrap();
  queue.fail(job.id, 2).await.unwrap();

  // One attempt left: immediately visible again.
  let retry = queue.claim(Duration::from_secs(60), 5).await.unwrap().unwrap();
  assert_eq!(retry.attempts, 2);
  queue.fail(retry.id, 2).await.unwrap();

  // Bounded retention: the message is gone, not parked forever.
  assert!(queue.claim(Duration::from_secs(60), 5).await.unwrap().is_none());
  assert_eq!(queue.depth().await.unwrap(), 0);
}
