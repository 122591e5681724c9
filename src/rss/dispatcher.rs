//! Bounded worker pool that runs fetch jobs.
//!
//! Jobs arrive through a [`DispatchQueue`] handle, are coalesced per feed while
//! pending, and run on spawned tasks gated by a semaphore. A job whose cycle
//! ends in [`Outcome::RetryableFailure`] is re-queued after the requested delay
//! until it runs out of attempts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{FeedkeeperError, Result};
use crate::rss::orchestrator::{FetchOrchestrator, Outcome};
use crate::rss::ports::FetchQueue;

#[derive(Debug, Clone, Copy)]
struct Job {
    feed_id: i64,
    attempt: u32,
}

type PendingSet = Arc<Mutex<HashSet<i64>>>;

fn lock(pending: &PendingSet) -> std::sync::MutexGuard<'_, HashSet<i64>> {
    pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable handle for submitting fetch jobs.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: PendingSet,
}

impl DispatchQueue {
    /// Whether a job for `feed_id` is queued, running or waiting to retry.
    pub fn is_pending(&self, feed_id: i64) -> bool {
        lock(&self.pending).contains(&feed_id)
    }

    /// Number of feeds with an outstanding job.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[async_trait]
impl FetchQueue for DispatchQueue {
    async fn enqueue(&self, feed_id: i64) -> Result<()> {
        if !lock(&self.pending).insert(feed_id) {
            debug!("Feed {} already queued", feed_id);
            return Ok(());
        }

        if self.tx.send(Job { feed_id, attempt: 1 }).is_err() {
            lock(&self.pending).remove(&feed_id);
            return Err(FeedkeeperError::Shutdown);
        }
        Ok(())
    }
}

/// Receives jobs and runs them on the orchestrator.
pub struct Dispatcher {
    orchestrator: Arc<FetchOrchestrator>,
    rx: mpsc::UnboundedReceiver<Job>,
    queue: DispatchQueue,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_attempts: u32,
}

impl Dispatcher {
    /// Create a dispatcher and the handle that feeds it.
    pub fn new(
        orchestrator: Arc<FetchOrchestrator>,
        config: &DispatcherConfig,
    ) -> (Self, DispatchQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = DispatchQueue {
            tx,
            pending: Arc::new(Mutex::new(HashSet::new())),
        };
        let max_concurrent = config.max_concurrent_fetches.max(1);
        let dispatcher = Self {
            orchestrator,
            rx,
            queue: queue.clone(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_attempts: config.max_attempts.max(1),
        };
        (dispatcher, queue)
    }

    /// Run until `shutdown` fires, then wait for running jobs to finish.
    ///
    /// Jobs still queued or waiting to retry are dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Fetch dispatcher started (max {} concurrent fetches)",
            self.max_concurrent
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Fetch dispatcher shutting down");
                    break;
                }
                job = self.rx.recv() => match job {
                    Some(job) => self.dispatch(job).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        // Every permit back means no cycle is still writing.
        let _ = self.semaphore.acquire_many(self.max_concurrent as u32).await;
        info!("Fetch dispatcher stopped");
    }

    async fn dispatch(&self, job: Job) {
        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };

        let orchestrator = self.orchestrator.clone();
        let queue = self.queue.clone();
        let max_attempts = self.max_attempts;

        tokio::spawn(async move {
            let outcome = orchestrator.run_fetch(job.feed_id).await;
            drop(permit);

            match outcome {
                Outcome::RetryableFailure { defer } if job.attempt < max_attempts => {
                    debug!(
                        "Retrying feed {} in {}s (attempt {} of {})",
                        job.feed_id,
                        defer.as_secs(),
                        job.attempt + 1,
                        max_attempts
                    );
                    tokio::time::sleep(defer).await;
                    let retry = Job {
                        feed_id: job.feed_id,
                        attempt: job.attempt + 1,
                    };
                    if queue.tx.send(retry).is_err() {
                        lock(&queue.pending).remove(&job.feed_id);
                    }
                }
                Outcome::RetryableFailure { .. } => {
                    warn!(
                        "Giving up on feed {} after {} attempts",
                        job.feed_id, job.attempt
                    );
                    lock(&queue.pending).remove(&job.feed_id);
                }
                Outcome::FatalFailure { reason } => {
                    warn!("Fetch of feed {} abandoned: {}", job.feed_id, reason);
                    lock(&queue.pending).remove(&job.feed_id);
                }
                Outcome::Success(report) => {
                    debug!("Feed {} done: {:?}", job.feed_id, report);
                    lock(&queue.pending).remove(&job.feed_id);
                }
            }
        });
    }
}

/// Spawn a dispatcher as a background task.
pub fn start_dispatcher(
    orchestrator: Arc<FetchOrchestrator>,
    config: &DispatcherConfig,
    shutdown: broadcast::Receiver<()>,
) -> (DispatchQueue, JoinHandle<()>) {
    let (dispatcher, queue) = Dispatcher::new(orchestrator, config);
    let handle = tokio::spawn(dispatcher.run(shutdown));
    (queue, handle)
}
