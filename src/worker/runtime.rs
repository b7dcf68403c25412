//! Worker pool: claims jobs, invokes the handler, settles deliveries.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::queue::{Delivery, JobQueue};

use super::{JobHandler, RetryPolicy};

/// A pool of queue consumers for one worker role.
///
/// `concurrency` consumer loops run side by side; each claims one job at a
/// time, so at most `concurrency` jobs of this role are in flight per
/// process. A job runs to completion inside its consumer with no
/// interleaving beyond I/O awaits.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    retry: RetryPolicy,
    /// Process-unique consumer name prefix. Redis consumer groups key
    /// pending entries by consumer name, so two processes must not share
    /// one.
    instance: String,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            retry,
            instance: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Run consumer loops until `shutdown` flips to true, then drain.
    ///
    /// In-flight jobs finish before the pool returns; unclaimed jobs stay
    /// queued for the next process.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let topic = self.handler.topic();
        info!(%topic, concurrency = self.concurrency, "worker pool starting");

        let mut consumers = JoinSet::new();
        for index in 0..self.concurrency {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let retry = self.retry;
            let shutdown = shutdown.clone();
            let consumer = format!("{}-{}-{}", topic, self.instance, index);

            consumers.spawn(async move {
                consume_loop(queue, handler, retry, shutdown, consumer).await;
            });
        }

        while consumers.join_next().await.is_some() {}
        info!(%topic, "worker pool stopped");
    }
}

async fn consume_loop(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
    consumer: String,
) {
    let topic = handler.topic();

    loop {
        if *shutdown.borrow() {
            return;
        }

        // `claim` returns `None` on its poll timeout, which is what lets
        // an idle consumer observe shutdown.
        let delivery = match queue.claim(topic, &consumer).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(err) => {
                warn!(%topic, consumer, %err, "claim failed");
                continue;
            }
        };

        settle(&*queue, &*handler, retry, topic, delivery, &consumer).await;
    }
}

/// Run one delivery through the handler and settle it.
async fn settle(
    queue: &dyn JobQueue,
    handler: &dyn JobHandler,
    retry: RetryPolicy,
    topic: crate::queue::Topic,
    delivery: Delivery,
    consumer: &str,
) {
    match handler.handle(&delivery.job).await {
        Ok(()) => {
            info!(%topic, consumer, attempt = delivery.attempt, "job complete");
            if let Err(err) = queue.ack(topic, &delivery.token).await {
                warn!(%topic, %err, "ack failed; job may be redelivered");
            }
        }
        Err(job_err) if retry.is_final(&job_err, delivery.attempt) => {
            error!(
                %topic,
                consumer,
                attempt = delivery.attempt,
                %job_err,
                "job failed terminally"
            );
            handler.on_final_failure(&delivery.job, &job_err).await;
            if let Err(err) = queue.ack(topic, &delivery.token).await {
                warn!(%topic, %err, "ack of failed job did not stick");
            }
        }
        Err(job_err) => {
            warn!(
                %topic,
                consumer,
                attempt = delivery.attempt,
                %job_err,
                "job failed; leaving for redelivery"
            );
            if let Err(err) = queue.nack(topic, &delivery.token).await {
                warn!(%topic, %err, "nack failed");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{StorageError, WorkerError};
    use crate::queue::{Job, MemoryJobQueue, TileJob, Topic};

    /// Handler that fails a configurable number of times before succeeding.
    struct FlakyHandler {
        failures: AtomicU32,
        handled: AtomicU32,
        final_failures: AtomicU32,
        retryable: bool,
    }

    impl FlakyHandler {
        fn new(failures: u32, retryable: bool) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                handled: AtomicU32::new(0),
                final_failures: AtomicU32::new(0),
                retryable,
            }
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        fn topic(&self) -> Topic {
            Topic::Tile
        }

        async fn handle(&self, _job: &Job) -> Result<(), WorkerError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(if self.retryable {
                    WorkerError::Storage(StorageError::Io("transient".to_string()))
                } else {
                    WorkerError::Input("malformed".to_string())
                });
            }
            Ok(())
        }

        async fn on_final_failure(&self, _job: &Job, _error: &WorkerError) {
            self.final_failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tile_job() -> Job {
        Job::Tile(TileJob {
            owner_id: 1,
            image_id: "img".to_string(),
            media_type: "png".to_string(),
            original_name: "img.png".to_string(),
        })
    }

    async fn run_pool_until_drained(
        queue: Arc<MemoryJobQueue>,
        handler: Arc<FlakyHandler>,
        retry: RetryPolicy,
    ) {
        let pool = WorkerPool::new(queue.clone(), handler, 1, retry);
        let (tx, rx) = watch::channel(false);

        let pool_task = tokio::spawn(async move { pool.run(rx).await });

        // Give the consumer time to drain the queue, then stop it.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if queue.ready_depth(Topic::Tile) == 0 && queue.in_flight_depth(Topic::Tile) == 0 {
                break;
            }
        }
        tx.send(true).unwrap();
        pool_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_success_acks_job() {
        let queue = Arc::new(MemoryJobQueue::new(Duration::from_secs(60)));
        let handler = Arc::new(FlakyHandler::new(0, true));
        queue.enqueue(&tile_job()).await.unwrap();

        run_pool_until_drained(queue.clone(), handler.clone(), RetryPolicy::default()).await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert_eq!(handler.final_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_until_success() {
        // Visibility of zero makes a nacked job immediately reclaimable.
        let queue = Arc::new(MemoryJobQueue::new(Duration::from_millis(0)));
        let handler = Arc::new(FlakyHandler::new(2, true));
        queue.enqueue(&tile_job()).await.unwrap();

        run_pool_until_drained(queue.clone(), handler.clone(), RetryPolicy::new(5)).await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 3);
        assert_eq!(handler.final_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_input_error_fails_without_retry() {
        let queue = Arc::new(MemoryJobQueue::new(Duration::from_millis(0)));
        let handler = Arc::new(FlakyHandler::new(10, false));
        queue.enqueue(&tile_job()).await.unwrap();

        run_pool_until_drained(queue.clone(), handler.clone(), RetryPolicy::new(5)).await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert_eq!(handler.final_failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_terminal() {
        let queue = Arc::new(MemoryJobQueue::new(Duration::from_millis(0)));
        let handler = Arc::new(FlakyHandler::new(10, true));
        queue.enqueue(&tile_job()).await.unwrap();

        run_pool_until_drained(queue.clone(), handler.clone(), RetryPolicy::new(3)).await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 3);
        assert_eq!(handler.final_failures.load(Ordering::SeqCst), 1);
    }
}
