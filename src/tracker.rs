//! Job lifecycle and the fan-in counter.
//!
//! A job expects N units. Workers report each unit by its idempotency key;
//! the tracker counts each key at most once and fires the completion
//! notifier from the one call that moves the job from running to completed.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identity::TrackId;
use crate::model::{Job, JobId, JobMeta};
use crate::notify::CompletionNotifier;
use crate::store::{CountOutcome, JobStore, KeyState};
use crate::telemetry::metrics;

/// What a `mark_processed` call amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The key was counted. `completed` is true for exactly one call per
    /// job.
    Counted { completed: bool },
    /// The key had already been counted for this job (redelivery).
    DuplicateSuppressed { completed: bool },
    /// The job was already completed, or full. Nothing changed.
    AlreadyCompleted,
}

impl MarkOutcome {
    /// This call observed the Running -> Completed transition.
    pub fn completed(self) -> bool {
        match self {
            MarkOutcome::Counted { completed } | MarkOutcome::DuplicateSuppressed { completed } => {
                completed
            }
            MarkOutcome::AlreadyCompleted => false,
        }
    }
}

/// Creates jobs and advances their counters.
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn CompletionNotifier>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn JobStore>, notifier: Arc<dyn CompletionNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Store a new running job expecting `expected_count` units.
    pub async fn create(&self, expected_count: i64, meta: JobMeta) -> Result<JobId> {
        if expected_count <= 0 {
            return Err(Error::InvalidArgument(format!(
                "expected_count must be positive, got {expected_count}"
            )));
        }

        let job = Job::new(expected_count, meta);
        self.store.insert_job(&job).await?;

        metrics::jobs_created().add(1, &[]);
        info!(job_id = %job.job_id, expected_count, "job created");
        Ok(job.job_id)
    }

    /// Snapshot of a job.
    pub async fn get(&self, job_id: JobId) -> Result<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))
    }

    /// Whether `key` still needs counting for `job_id`. Read-only; the
    /// answer may be stale by the time the caller acts on it, so the count
    /// itself stays guarded by `mark_processed`.
    pub(crate) async fn key_state(&self, job_id: JobId, key: &TrackId) -> Result<KeyState> {
        self.store
            .key_state(job_id, key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))
    }

    /// Count one unit of `job_id`, identified by `key`.
    ///
    /// Repeated calls with the same key count once. The call that completes
    /// the job notifies synchronously before returning.
    pub(crate) async fn mark_processed(&self, job_id: JobId, key: &TrackId) -> Result<MarkOutcome> {
        let result = self
            .store
            .count_once(job_id, key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;

        let outcome = match result.outcome {
            CountOutcome::Counted => MarkOutcome::Counted {
                completed: result.completed,
            },
            CountOutcome::Duplicate => {
                debug!(job_id = %job_id, key = key.short(), "duplicate unit suppressed");
                MarkOutcome::DuplicateSuppressed {
                    completed: result.completed,
                }
            }
            CountOutcome::Rejected => {
                debug!(job_id = %job_id, key = key.short(), status = %result.job.status, "unit arrived after job closed");
                MarkOutcome::AlreadyCompleted
            }
        };

        debug!(
            job_id = %job_id,
            processed = result.job.processed_count,
            expected = result.job.expected_count,
            "job progress"
        );

        if result.completed {
            self.on_completed(&result.job).await;
        }

        Ok(outcome)
    }

    /// Lower the expected count to what was actually emitted. May complete
    /// the job if enough units were already counted.
    pub(crate) async fn correct_expected(&self, job_id: JobId, emitted: i64) -> Result<Job> {
        let (job, completed) = self
            .store
            .set_expected(job_id, emitted)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;

        warn!(job_id = %job_id, expected_count = job.expected_count, "expected count corrected");
        if completed {
            self.on_completed(&job).await;
        }
        Ok(job)
    }

    /// Drop a job that never had a unit emitted.
    pub(crate) async fn abandon(&self, job_id: JobId) -> Result<()> {
        self.store.delete_job(job_id).await?;
        warn!(job_id = %job_id, "job abandoned");
        Ok(())
    }

    async fn on_completed(&self, job: &Job) {
        metrics::jobs_completed().add(1, &[]);
        if let Some(completed_at) = job.completed_at {
            let elapsed = (completed_at - job.created_at).num_milliseconds().max(0);
            metrics::operation_duration_ms()
                .record(elapsed as f64, &[KeyValue::new("operation", "job.complete")]);
        }
        info!(
            job_id = %job.job_id,
            processed = job.processed_count,
            expected = job.expected_count,
            "job completed"
        );

        // The transition is already committed; a failed notification is
        // reported but cannot be undone.
        if let Err(e) = self.notifier.notify(job).await {
            metrics::notifications_failed().add(1, &[]);
            error!(job_id = %job.job_id, error = %e, "completion notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identity;
    use crate::model::JobStatus;
    use crate::notify::ChannelNotifier;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::task::JoinSet;

    fn test_tracker() -> (
        JobTracker,
        UnboundedReceiver<crate::event::CompletionEvent>,
    ) {
        let (notifier, rx) = ChannelNotifier::channel();
        let tracker = JobTracker::new(Arc::new(MemoryStore::new()), Arc::new(notifier));
        (tracker, rx)
    }

    fn key(n: usize) -> TrackId {
        identity(&format!("title {n}"), "artist")
    }

    #[tokio::test]
    async fn create_rejects_non_positive_counts() {
        let (tracker, _rx) = test_tracker();

        for bad in [0, -1, -100] {
            let err = tracker.create(bad, JobMeta::default()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
        }
    }

    #[tokio::test]
    async fn rejected_create_persists_nothing() {
        let store = Arc::new(MemoryStore::new());
        let (notifier, _rx) = ChannelNotifier::channel();
        let tracker = JobTracker::new(store.clone(), Arc::new(notifier));

        assert!(tracker.create(0, JobMeta::default()).await.is_err());
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn new_job_is_running_with_zero_processed() {
        let (tracker, _rx) = test_tracker();
        let meta = JobMeta::source("charts", "beatport/top100.json");
        let id = tracker.create(3, meta.clone()).await.unwrap();

        let job = tracker.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.expected_count, 3);
        assert_eq!(job.processed_count, 0);
        assert_eq!(job.meta, meta);
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn get_unknown_job_is_not_found() {
        let (tracker, _rx) = test_tracker();
        let err = tracker.get(JobId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = tracker.mark_processed(JobId::new(), &key(0)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn five_distinct_keys_complete_exactly_once() {
        let (tracker, mut rx) = test_tracker();
        let id = tracker.create(5, JobMeta::default()).await.unwrap();

        let mut completions = 0;
        for n in 0..5 {
            if tracker.mark_processed(id, &key(n)).await.unwrap().completed() {
                completions += 1;
            }
        }

        assert_eq!(completions, 1);
        let job = tracker.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_count, 5);
        assert!(job.completed_at.is_some());

        let event = rx.recv().await.expect("completion event");
        assert_eq!(event.detail.job_id, id);
        assert_eq!(event.detail.processed_count, 5);
        assert!(rx.try_recv().is_err(), "only one completion event");
    }

    #[tokio::test]
    async fn same_key_counts_once() {
        let (tracker, _rx) = test_tracker();
        let id = tracker.create(2, JobMeta::default()).await.unwrap();

        let first = tracker.mark_processed(id, &key(1)).await.unwrap();
        let second = tracker.mark_processed(id, &key(1)).await.unwrap();

        assert_eq!(first, MarkOutcome::Counted { completed: false });
        assert_eq!(second, MarkOutcome::DuplicateSuppressed { completed: false });
        assert_eq!(tracker.get(id).await.unwrap().processed_count, 1);
    }

    #[tokio::test]
    async fn redelivery_after_completion_is_a_noop() {
        let (tracker, mut rx) = test_tracker();
        let id = tracker.create(1, JobMeta::default()).await.unwrap();

        assert!(tracker.mark_processed(id, &key(1)).await.unwrap().completed());
        let completed_at = tracker.get(id).await.unwrap().completed_at;

        let again = tracker.mark_processed(id, &key(1)).await.unwrap();
        assert!(!again.completed());
        let late = tracker.mark_processed(id, &key(2)).await.unwrap();
        assert_eq!(late, MarkOutcome::AlreadyCompleted);

        let job = tracker.get(id).await.unwrap();
        assert_eq!(job.processed_count, 1);
        assert_eq!(job.completed_at, completed_at);

        rx.recv().await.expect("completion event");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_marks_complete_exactly_once() {
        const N: usize = 64;
        let (tracker, mut rx) = test_tracker();
        let id = tracker.create(N as i64, JobMeta::default()).await.unwrap();

        let mut tasks = JoinSet::new();
        for n in 0..N {
            // Every key is delivered twice to mimic at-least-once delivery.
            for _ in 0..2 {
                let tracker = tracker.clone();
                tasks.spawn(async move { tracker.mark_processed(id, &key(n)).await.unwrap() });
            }
        }

        let mut completions = 0;
        while let Some(outcome) = tasks.join_next().await {
            if outcome.unwrap().completed() {
                completions += 1;
            }
        }

        assert_eq!(completions, 1);
        let job = tracker.get(id).await.unwrap();
        assert_eq!(job.processed_count, N as i64);
        assert_eq!(job.status, JobStatus::Completed);

        rx.recv().await.expect("completion event");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn correcting_expected_count_can_complete() {
        let (tracker, mut rx) = test_tracker();
        let id = tracker.create(4, JobMeta::default()).await.unwrap();
        tracker.mark_processed(id, &key(0)).await.unwrap();
        tracker.mark_processed(id, &key(1)).await.unwrap();

        let job = tracker.correct_expected(id, 2).await.unwrap();
        assert_eq!(job.expected_count, 2);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(rx.recv().await.unwrap().detail.expected_count, 2);
    }

    #[tokio::test]
    async fn key_state_follows_counting_and_completion() {
        let store = Arc::new(MemoryStore::new());
        let (notifier, _rx) = ChannelNotifier::channel();
        let tracker = JobTracker::new(store.clone(), Arc::new(notifier));
        let id = tracker.create(2, JobMeta::default()).await.unwrap();

        assert_eq!(tracker.key_state(id, &key(0)).await.unwrap(), KeyState::Pending);
        tracker.mark_processed(id, &key(0)).await.unwrap();
        assert_eq!(tracker.key_state(id, &key(0)).await.unwrap(), KeyState::Counted);
        assert_eq!(store.counted_keys(id), Some(1));

        assert!(tracker.mark_processed(id, &key(1)).await.unwrap().completed());
        assert_eq!(tracker.key_state(id, &key(0)).await.unwrap(), KeyState::Closed);
        assert_eq!(tracker.key_state(id, &key(9)).await.unwrap(), KeyState::Closed);
        assert_eq!(store.counted_keys(id), Some(0));

        let after = tracker.mark_processed(id, &key(0)).await.unwrap();
        assert_eq!(after, MarkOutcome::AlreadyCompleted);
        assert_eq!(tracker.get(id).await.unwrap().processed_count, 2);

        let err = tracker.key_state(JobId::new(), &key(0)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn abandoned_job_is_gone() {
        let (tracker, _rx) = test_tracker();
        let id = tracker.create(1, JobMeta::default()).await.unwrap();
        tracker.abandon(id).await.unwrap();
        assert!(matches!(tracker.get(id).await, Err(Error::NotFound(_))));
    }
}
