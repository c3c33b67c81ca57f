//! Worker pool: pulls work messages, resolves tracks, reports to the job
//! tracker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

use crate::dedup::DedupStore;
use crate::error::{Error, Result};
use crate::model::{DeadLetterEntry, WorkMessage};
use crate::notify::DeadLetterRouter;
use crate::queue::{Delivery, WorkQueue};
use crate::resolver::{ResolveError, Resolver};
use crate::store::KeyState;
use crate::telemetry::job::{record_outcome, start_item_span};
use crate::telemetry::metrics;
use crate::tracker::{JobTracker, MarkOutcome};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Deliveries of one message before it is dead-lettered.
    pub max_attempts: u32,
    /// How long a worker sleeps after finding the queue empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// How one delivery was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Resolved, stored and counted.
    Resolved { completed: bool },
    /// Sent to the dead-letter sink and counted.
    DeadLettered { completed: bool },
    /// Already counted for this job; acked without side effects on the
    /// counter.
    Duplicate,
    /// The job had already completed; acked.
    Late,
    /// Handed back to the queue for redelivery.
    Retrying,
}

impl ItemOutcome {
    fn label(self) -> &'static str {
        match self {
            ItemOutcome::Resolved { .. } => "resolved",
            ItemOutcome::DeadLettered { .. } => "dead_lettered",
            ItemOutcome::Duplicate => "duplicate",
            ItemOutcome::Late => "late",
            ItemOutcome::Retrying => "retry",
        }
    }
}

/// A fixed-size pool of workers sharing one queue.
///
/// Unresolvable tracks, and tracks whose resolver or store retries are
/// exhausted, are dead-lettered and still counted toward their job, so one
/// bad track cannot keep a batch from completing. A delivery whose unit is
/// already counted, or whose job has completed, is acked without resolving.
#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<dyn WorkQueue>,
    resolver: Arc<dyn Resolver>,
    tracker: JobTracker,
    dedup: DedupStore,
    dead_letters: Arc<dyn DeadLetterRouter>,
    config: WorkerConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        resolver: Arc<dyn Resolver>,
        tracker: JobTracker,
        dedup: DedupStore,
        dead_letters: Arc<dyn DeadLetterRouter>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            resolver,
            tracker,
            dedup,
            dead_letters,
            config,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Signal every worker to stop after its current delivery.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run the workers until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<()> {
        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers.max(1) {
            let pool = self.clone();
            workers.spawn(async move { pool.worker_loop(worker).await });
        }
        info!(
            workers = self.config.workers,
            queue = self.queue.name(),
            "worker pool started"
        );

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("worker task panicked: {e}");
            }
        }
        info!("worker pool stopped");
        Ok(())
    }

    async fn worker_loop(&self, worker: usize) {
        let mut stop = self.shutdown.subscribe();
        if *stop.borrow() {
            return;
        }

        loop {
            let next = tokio::select! {
                _ = stop.changed() => return,
                next = self.queue.consume() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.process(worker, delivery).await {
                        error!(worker, error = %e, "delivery handling failed");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = stop.changed() => return,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(worker, error = %e, "consume failed, backing off");
                    tokio::select! {
                        _ = stop.changed() => return,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Handle one delivery end to end: resolve, record, count, ack.
    pub async fn process(&self, worker: usize, delivery: Delivery) -> Result<ItemOutcome> {
        let span = start_item_span(
            worker,
            delivery.message.job_id,
            &delivery.message.idempotency_key,
            delivery.attempt,
        );
        let started = Instant::now();

        let outcome = self
            .handle(delivery)
            .instrument(span.clone())
            .await?;

        record_outcome(&span, outcome.label());
        metrics::items_processed().add(1, &[KeyValue::new("outcome", outcome.label())]);
        metrics::operation_duration_ms().record(
            started.elapsed().as_millis() as f64,
            &[KeyValue::new("operation", "item.process")],
        );
        Ok(outcome)
    }

    async fn handle(&self, delivery: Delivery) -> Result<ItemOutcome> {
        let message = &delivery.message;

        // Redeliveries of units that are already settled never reach the
        // resolver or the dead-letter sink again.
        match self
            .tracker
            .key_state(message.job_id, &message.idempotency_key)
            .await
        {
            Ok(KeyState::Pending) => {}
            Ok(KeyState::Counted) => {
                debug!("unit already counted, skipping resolve");
                return self.count(delivery, |_| ItemOutcome::Duplicate).await;
            }
            Ok(KeyState::Closed) => {
                debug!("job already completed, dropping delivery");
                self.queue.ack(&delivery).await?;
                return Ok(ItemOutcome::Late);
            }
            Err(Error::NotFound(what)) => {
                // The job is gone (abandoned). Nothing will ever count this.
                warn!(%what, "work message for unknown job, dropping");
                self.queue.ack(&delivery).await?;
                return Ok(ItemOutcome::Late);
            }
            Err(e) => return self.store_failed(delivery, "job lookup", e).await,
        }

        let track = &message.track;
        match self.resolver.search(&track.title, &track.artist).await {
            Ok(enrichment) => {
                let mut resolved = track.clone();
                resolved.rehash();
                resolved.enrichment = Some(enrichment);
                if let Err(e) = self.dedup.put(&resolved).await {
                    return self.store_failed(delivery, "track store", e).await;
                }
                debug!(track = %resolved, "track resolved");
                self.count(delivery, |completed| ItemOutcome::Resolved { completed })
                    .await
            }
            Err(ResolveError::NotFound { .. }) => {
                self.dead_letter(message, "not_found", "no catalog match")
                    .await;
                self.count(delivery, |completed| ItemOutcome::DeadLettered { completed })
                    .await
            }
            Err(ResolveError::Transient(reason)) => {
                if delivery.attempt >= self.config.max_attempts {
                    let why = format!(
                        "retries exhausted after {} attempts: {reason}",
                        delivery.attempt
                    );
                    self.dead_letter(message, "retries_exhausted", &why).await;
                    return self
                        .count(delivery, |completed| ItemOutcome::DeadLettered { completed })
                        .await;
                }
                warn!(attempt = delivery.attempt, %reason, "resolver unavailable, will retry");
                self.retry(delivery).await
            }
        }
    }

    /// A store call failed before the unit could be counted. Transient
    /// failures are retried up to `max_attempts`; after that, or for a
    /// permanent failure, the unit is dead-lettered and counted.
    async fn store_failed(
        &self,
        delivery: Delivery,
        stage: &'static str,
        e: Error,
    ) -> Result<ItemOutcome> {
        if e.is_transient() && delivery.attempt < self.config.max_attempts {
            warn!(attempt = delivery.attempt, stage, error = %e, "store unavailable, will retry");
            return self.retry(delivery).await;
        }

        let why = if e.is_transient() {
            format!(
                "retries exhausted after {} attempts: {stage} failed: {e}",
                delivery.attempt
            )
        } else {
            format!("{stage} failed: {e}")
        };
        self.dead_letter(&delivery.message, "store_failed", &why)
            .await;
        self.count(delivery, |completed| ItemOutcome::DeadLettered { completed })
            .await
    }

    /// Report the unit to the tracker and ack.
    async fn count(
        &self,
        delivery: Delivery,
        counted: impl FnOnce(bool) -> ItemOutcome,
    ) -> Result<ItemOutcome> {
        let message = &delivery.message;
        let outcome = match self
            .tracker
            .mark_processed(message.job_id, &message.idempotency_key)
            .await
        {
            Ok(MarkOutcome::Counted { completed }) => counted(completed),
            Ok(MarkOutcome::DuplicateSuppressed { .. }) => ItemOutcome::Duplicate,
            Ok(MarkOutcome::AlreadyCompleted) => ItemOutcome::Late,
            Err(Error::NotFound(what)) => {
                warn!(%what, "work message for unknown job, dropping");
                ItemOutcome::Late
            }
            Err(e) if e.is_transient() && delivery.attempt < self.config.max_attempts => {
                warn!(attempt = delivery.attempt, error = %e, "counting failed, will retry");
                return self.retry(delivery).await;
            }
            Err(e) => {
                // The counter itself is failing; the unit cannot be
                // recorded anywhere else. Drop it so it stops cycling.
                error!(
                    attempt = delivery.attempt,
                    error = %e,
                    "counting failed permanently, dropping delivery"
                );
                self.queue.ack(&delivery).await?;
                return Err(e);
            }
        };

        self.queue.ack(&delivery).await?;
        Ok(outcome)
    }

    async fn retry(&self, delivery: Delivery) -> Result<ItemOutcome> {
        self.queue.retry(delivery).await?;
        Ok(ItemOutcome::Retrying)
    }

    /// Fire-and-forget: a failed send is logged and never blocks counting.
    async fn dead_letter(&self, message: &WorkMessage, reason: &'static str, why: &str) {
        metrics::dead_letters().add(1, &[KeyValue::new("reason", reason)]);
        warn!(track = %message.track, reason = why, "dead-lettering track");
        let entry = DeadLetterEntry::new(message.job_id, message.track.clone(), why);
        if let Err(e) = self.dead_letters.send(entry).await {
            error!(job_id = %message.job_id, error = %e, "dead-letter send failed");
        }
    }
}
