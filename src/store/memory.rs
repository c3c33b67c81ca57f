//! In-process storage backend.
//!
//! Each job lives with its counted-key set behind a single mutex, so the
//! check-record-increment-complete sequence is one critical section. The
//! lock is never held across an `.await`.
//!
//! A job's counted-key set is kept only while the job is running and is
//! cleared on completion; later deliveries are rejected by status alone.
//! Job records themselves are kept until deleted.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use super::{CountOutcome, CountResult, JobStore, KeyState, TrackStore};
use crate::error::{Error, Result};
use crate::identity::TrackId;
use crate::model::{Job, JobId, JobStatus, Track};

struct JobEntry {
    job: Job,
    counted: HashSet<TrackId>,
}

impl JobEntry {
    /// Guarded Running -> Completed write.
    fn complete_if_due(&mut self) -> bool {
        if self.job.status == JobStatus::Running && self.job.is_due() {
            let now = Utc::now();
            self.job.status = JobStatus::Completed;
            self.job.completed_at = Some(now);
            self.job.updated_at = now;
            self.counted = HashSet::new();
            true
        } else {
            false
        }
    }
}

/// Storage backend holding everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    tracks: RwLock<HashMap<TrackId, Track>>,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored track records.
    pub fn track_count(&self) -> usize {
        self.tracks.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Number of stored jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().map(|j| j.len()).unwrap_or(0)
    }

    /// Number of counted keys held for a job. `None` for an unknown job.
    pub fn counted_keys(&self, id: JobId) -> Option<usize> {
        self.jobs.lock().ok()?.get(&id).map(|entry| entry.counted.len())
    }

    fn jobs(&self) -> Result<MutexGuard<'_, HashMap<JobId, JobEntry>>> {
        self.jobs
            .lock()
            .map_err(|_| Error::TransientStore("job table lock poisoned".to_string()))
    }
}

#[async_trait]
impl TrackStore for MemoryStore {
    async fn get_track(&self, id: &TrackId) -> Result<Option<Track>> {
        let tracks = self
            .tracks
            .read()
            .map_err(|_| Error::TransientStore("track table lock poisoned".to_string()))?;
        Ok(tracks.get(id).cloned())
    }

    async fn put_track(&self, track: &Track) -> Result<()> {
        let mut tracks = self
            .tracks
            .write()
            .map_err(|_| Error::TransientStore("track table lock poisoned".to_string()))?;
        tracks.insert(track.track_id.clone(), track.clone());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs()?;
        if jobs.contains_key(&job.job_id) {
            return Err(Error::InvalidArgument(format!(
                "job {} already exists",
                job.job_id
            )));
        }
        jobs.insert(
            job.job_id,
            JobEntry {
                job: job.clone(),
                counted: HashSet::new(),
            },
        );
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs()?.get(&id).map(|entry| entry.job.clone()))
    }

    async fn key_state(&self, id: JobId, key: &TrackId) -> Result<Option<KeyState>> {
        Ok(self.jobs()?.get(&id).map(|entry| {
            if entry.job.status.is_terminal() {
                KeyState::Closed
            } else if entry.counted.contains(key) {
                KeyState::Counted
            } else {
                KeyState::Pending
            }
        }))
    }

    async fn count_once(&self, id: JobId, key: &TrackId) -> Result<Option<CountResult>> {
        let mut jobs = self.jobs()?;
        let Some(entry) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        let outcome = if entry.counted.contains(key) {
            CountOutcome::Duplicate
        } else if entry.job.status == JobStatus::Running && !entry.job.is_due() {
            entry.counted.insert(key.clone());
            entry.job.processed_count += 1;
            entry.job.updated_at = Utc::now();
            CountOutcome::Counted
        } else {
            CountOutcome::Rejected
        };

        let completed = entry.complete_if_due();

        Ok(Some(CountResult {
            outcome,
            completed,
            job: entry.job.clone(),
        }))
    }

    async fn set_expected(&self, id: JobId, expected_count: i64) -> Result<Option<(Job, bool)>> {
        let mut jobs = self.jobs()?;
        let Some(entry) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        if entry.job.status == JobStatus::Running && expected_count < entry.job.expected_count {
            entry.job.expected_count = expected_count.max(entry.job.processed_count);
            entry.job.updated_at = Utc::now();
        }
        let completed = entry.complete_if_due();
        Ok(Some((entry.job.clone(), completed)))
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        self.jobs()?.remove(&id);
        Ok(())
    }
}
