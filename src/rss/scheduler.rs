//! Periodic sweep for due feeds.
//!
//! Every sweep interval the scheduler asks the orchestrator which feeds are due
//! and hands them to the fetch queue. The dispatcher does the actual work.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::rss::orchestrator::FetchOrchestrator;
use crate::rss::ports::FetchQueue;

/// Default sweep interval in seconds (15 minutes).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 900;

/// Background sweep that enqueues due feeds.
pub struct FeedScheduler {
    orchestrator: Arc<FetchOrchestrator>,
    queue: Arc<dyn FetchQueue>,
    sweep_interval: Duration,
}

impl FeedScheduler {
    /// Create a scheduler with the default sweep interval.
    pub fn new(orchestrator: Arc<FetchOrchestrator>, queue: Arc<dyn FetchQueue>) -> Self {
        Self {
            orchestrator,
            queue,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    /// Create a scheduler with a custom sweep interval.
    pub fn with_interval(
        orchestrator: Arc<FetchOrchestrator>,
        queue: Arc<dyn FetchQueue>,
        interval_secs: u64,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            sweep_interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Run the sweep loop until `shutdown` fires.
    ///
    /// The first sweep happens immediately.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Feed scheduler started (sweep interval: {} seconds)",
            self.sweep_interval.as_secs()
        );

        let mut timer = interval(self.sweep_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Feed scheduler shutting down");
                    break;
                }
                _ = timer.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Enqueue every feed that is due now. Returns how many were enqueued.
    pub async fn sweep(&self) -> usize {
        debug!("Checking for due feeds");

        let now = self.orchestrator.clock().now();
        let due = match self.orchestrator.select_due_feeds(now).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list due feeds: {}", e);
                return 0;
            }
        };

        if due.is_empty() {
            debug!("No feeds due");
            return 0;
        }

        info!("Enqueueing {} due feed(s)", due.len());

        let mut enqueued = 0;
        for feed_id in due {
            match self.queue.enqueue(feed_id).await {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    error!("Failed to enqueue feed {}: {}", feed_id, e);
                    break;
                }
            }
        }
        enqueued
    }
}

/// Start the scheduler as a background task.
pub fn start_scheduler(
    orchestrator: Arc<FetchOrchestrator>,
    queue: Arc<dyn FetchQueue>,
    config: &SchedulerConfig,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let scheduler = FeedScheduler::with_interval(orchestrator, queue, config.sweep_interval_secs);
    tokio::spawn(async move {
        scheduler.run(shutdown).await;
    })
}
