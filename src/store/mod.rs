//! Point-lookup storage seams.
//!
//! [`TrackStore`] is the identity-keyed record store behind deduplication.
//! [`JobStore`] holds job records and owns the one operation in the system
//! that needs mutual exclusion: counting a unit and detecting completion.
//! Both are implemented in-process by [`MemoryStore`] and against Postgres
//! by [`crate::db::Db`].

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::identity::TrackId;
use crate::model::{Job, JobId, Track};

pub use memory::MemoryStore;

/// Identity-keyed track records.
#[async_trait]
pub trait TrackStore: Send + Sync {
    /// Direct lookup by identity. Never scans.
    async fn get_track(&self, id: &TrackId) -> Result<Option<Track>>;

    /// Insert or replace the record stored under `track.track_id`.
    async fn put_track(&self, track: &Track) -> Result<()>;
}

/// What [`JobStore::count_once`] did with a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountOutcome {
    /// Key recorded, `processed_count` incremented by one.
    Counted,
    /// Key was already recorded for this job. Nothing incremented.
    Duplicate,
    /// Job is completed or already full. Nothing recorded.
    Rejected,
}

/// Where one idempotency key stands for a job, as seen by a plain read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Running job, key not yet counted.
    Pending,
    /// Running job, key already counted.
    Counted,
    /// The job has completed. Its counted keys are no longer kept.
    Closed,
}

/// Result of an atomic counting step.
#[derive(Debug, Clone)]
pub struct CountResult {
    pub outcome: CountOutcome,
    /// This call performed the Running -> Completed transition.
    pub completed: bool,
    /// Job state after the step.
    pub job: Job,
}

/// Job records and their counted-key sets.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Read-only check of `key` against the job. Returns `None` for an
    /// unknown job.
    async fn key_state(&self, id: JobId, key: &TrackId) -> Result<Option<KeyState>>;

    /// In one atomic step: record `key` for the job and increment
    /// `processed_count` iff the key is new and the job is running and not
    /// full; then, if the job is running and due, flip it to completed and
    /// stamp `completed_at`, dropping the job's counted keys. Returns `None`
    /// for an unknown job.
    async fn count_once(&self, id: JobId, key: &TrackId) -> Result<Option<CountResult>>;

    /// Lower `expected_count` of a running job, completing it in the same
    /// step if it is now due. Returns the job and whether this call
    /// completed it, or `None` for an unknown job.
    async fn set_expected(&self, id: JobId, expected_count: i64) -> Result<Option<(Job, bool)>>;

    /// Remove a job and its counted keys. Used only for jobs that never had
    /// a message emitted.
    async fn delete_job(&self, id: JobId) -> Result<()>;
}
