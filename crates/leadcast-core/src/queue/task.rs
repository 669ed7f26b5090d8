//! The per-key task queue.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

use super::retry::{RetryPolicy, execute_with_retry};
use crate::store::normalize_email;
use crate::{Error, Result};

/// Spacing between tasks on one lane, to stay under the sheet API's rate
/// limits.
const INTER_TASK_SPACING: Duration = Duration::from_millis(500);

type MutationFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Mutation = Arc<dyn Fn() -> MutationFuture + Send + Sync>;

struct QueuedTask {
    context: String,
    mutation: Mutation,
    done: oneshot::Sender<Result<()>>,
}

/// Handle to a queued mutation's eventual result.
#[derive(Debug)]
pub struct PendingUpdate {
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingUpdate {
    /// Waits for the queued mutation to finish.
    ///
    /// # Errors
    ///
    /// Returns the task's error after its retries are exhausted, or
    /// [`Error::Queue`] if the queue dropped the task.
    pub async fn wait(self) -> Result<()> {
        self.rx
            .await
            .map_err(|_| Error::Queue("update task dropped before completion".into()))?
    }
}

/// Serialized per-lead mutation queue.
///
/// One lane per normalized email; within a lane tasks run strictly in
/// submission order, one at a time. Different lanes are fully independent.
///
/// The queue is in-memory and intentionally non-durable: pending tasks die
/// with the process (at-most-once). The sheet remains the source of truth
/// and every periodic sweep re-derives its intent from it, so a lost task
/// surfaces as ordinary drift, not corruption.
pub struct UpdateQueue {
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<QueuedTask>>>,
    policy: RetryPolicy,
    spacing: Duration,
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateQueue {
    /// Creates a queue with the standard retry policy and task spacing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default(), INTER_TASK_SPACING)
    }

    /// Creates a queue with a custom retry policy and spacing.
    #[must_use]
    pub fn with_policy(policy: RetryPolicy, spacing: Duration) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            policy,
            spacing,
        }
    }

    /// Enqueues a mutation for the lead keyed by `key`.
    ///
    /// The mutation closure is re-invoked on each retry attempt. The
    /// returned handle resolves once the task succeeds or exhausts its
    /// retries; a failed task never blocks the tasks queued behind it.
    pub async fn enqueue<F, Fut>(
        &self,
        key: &str,
        context: impl Into<String>,
        mutation: F,
    ) -> PendingUpdate
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let key = normalize_email(key);
        let (done, rx) = oneshot::channel();
        let task = QueuedTask {
            context: context.into(),
            mutation: Arc::new(move || Box::pin(mutation()) as MutationFuture),
            done,
        };

        let mut lanes = self.lanes.lock().await;
        let sender = lanes
            .entry(key.clone())
            .or_insert_with(|| self.spawn_lane(key.clone()));

        if let Err(rejected) = sender.send(task) {
            // The lane worker is gone (shutdown race); restart it once.
            let sender = self.spawn_lane(key.clone());
            let resend = sender.send(rejected.0);
            lanes.insert(key, sender);
            if let Err(still_rejected) = resend {
                let _ = still_rejected
                    .0
                    .done
                    .send(Err(Error::Queue("lane worker unavailable".into())));
            }
        }

        PendingUpdate { rx }
    }

    /// Number of lanes that have been opened so far.
    pub async fn lane_count(&self) -> usize {
        self.lanes.lock().await.len()
    }

    fn spawn_lane(&self, key: String) -> mpsc::UnboundedSender<QueuedTask> {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedTask>();
        let policy = self.policy.clone();
        let spacing = self.spacing;

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let QueuedTask {
                    context,
                    mutation,
                    done,
                } = task;

                let result = execute_with_retry(&policy, || mutation()).await;
                match &result {
                    Ok(()) => debug!(key = %key, context = %context, "update applied"),
                    Err(e) => warn!(key = %key, context = %context, error = %e, "update failed"),
                }

                // Caller may have stopped waiting; the task still ran.
                let _ = done.send(result);

                tokio::time::sleep(spacing).await;
            }
        });

        tx
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_queue() -> UpdateQueue {
        UpdateQueue::with_policy(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn tasks_apply_in_submission_order() {
        let queue = fast_queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut pending = Vec::new();
        for n in 0..10 {
            let log = Arc::clone(&log);
            pending.push(
                queue
                    .enqueue("lead@example.com", format!("append {n}"), move || {
                        let log = Arc::clone(&log);
                        async move {
                            log.lock().await.push(n);
                            Ok(())
                        }
                    })
                    .await,
            );
        }
        for p in pending {
            p.wait().await.unwrap();
        }

        assert_eq!(*log.lock().await, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn last_writer_in_queue_wins() {
        let queue = fast_queue();
        let status = Arc::new(Mutex::new("New".to_string()));

        let first = {
            let status = Arc::clone(&status);
            queue
                .enqueue("a@example.com", "status=Sent", move || {
                    let status = Arc::clone(&status);
                    async move {
                        *status.lock().await = "Sent".to_string();
                        Ok(())
                    }
                })
                .await
        };
        let second = {
            let status = Arc::clone(&status);
            queue
                .enqueue("a@example.com", "status=Replied", move || {
                    let status = Arc::clone(&status);
                    async move {
                        *status.lock().await = "Replied".to_string();
                        Ok(())
                    }
                })
                .await
        };

        first.wait().await.unwrap();
        second.wait().await.unwrap();
        assert_eq!(*status.lock().await, "Replied");
    }

    #[tokio::test]
    async fn keys_are_normalized_into_one_lane() {
        let queue = fast_queue();
        queue
            .enqueue("  User@Example.COM ", "noop", || async { Ok(()) })
            .await
            .wait()
            .await
            .unwrap();
        queue
            .enqueue("user@example.com", "noop", || async { Ok(()) })
            .await
            .wait()
            .await
            .unwrap();

        assert_eq!(queue.lane_count().await, 1);
    }

    #[tokio::test]
    async fn independent_keys_do_not_block_each_other() {
        let queue = fast_queue();

        let slow = {
            queue
                .enqueue("slow@example.com", "slow", || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                })
                .await
        };
        let fast = {
            queue
                .enqueue("fast@example.com", "fast", || async { Ok(()) })
                .await
        };

        // The fast lane finishes while the slow lane is still working.
        tokio::time::timeout(Duration::from_millis(50), fast.wait())
            .await
            .expect("fast lane blocked behind slow lane")
            .unwrap();
        slow.wait().await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let queue = fast_queue();
        let attempts = Arc::new(AtomicU32::new(0));

        let pending = {
            let attempts = Arc::clone(&attempts);
            queue
                .enqueue("retry@example.com", "flaky", move || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(Error::Store("rate limited".into()))
                        } else {
                            Ok(())
                        }
                    }
                })
                .await
        };

        pending.wait().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn auth_failure_propagates_without_retry() {
        let queue = fast_queue();
        let attempts = Arc::new(AtomicU32::new(0));

        let pending = {
            let attempts = Arc::clone(&attempts);
            queue
                .enqueue("auth@example.com", "stale token", move || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::Unauthorized("401".into())) }
                })
                .await
        };

        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_task_does_not_block_the_lane() {
        let queue = fast_queue();

        let doomed = queue
            .enqueue("lead@example.com", "doomed", || async {
                Err(Error::Store("permanently down".into()))
            })
            .await;
        let follower = queue
            .enqueue("lead@example.com", "follower", || async { Ok(()) })
            .await;

        assert!(doomed.wait().await.is_err());
        follower.wait().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_enqueues_apply_sequentially() {
        // The serialization property: N concurrent writers, final state
        // equals sequential application.
        let queue = Arc::new(fast_queue());
        let counter = Arc::new(Mutex::new(0_u32));

        let mut joins = Vec::new();
        for _ in 0..20 {
            let queue = Arc::clone(&queue);
            let counter = Arc::clone(&counter);
            joins.push(tokio::spawn(async move {
                queue
                    .enqueue("shared@example.com", "increment", move || {
                        let counter = Arc::clone(&counter);
                        async move {
                            // Non-atomic read-modify-write; only safe if the
                            // queue truly serializes the lane.
                            let read = *counter.lock().await;
                            tokio::task::yield_now().await;
                            *counter.lock().await = read + 1;
                            Ok(())
                        }
                    })
                    .await
                    .wait()
                    .await
            }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        assert_eq!(*counter.lock().await, 20);
    }
}
