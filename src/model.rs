//! Core data model.
//!
//! Tracks are the units of work, jobs count them, work messages carry them
//! across the queue, and dead-letter entries record the ones that could not
//! be resolved.

pub mod job;
pub mod track;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use job::{Job, JobId, JobMeta, JobStatus};
pub use track::Track;

use crate::identity::TrackId;

// ---------------------------------------------------------------------------
// Work Message
// ---------------------------------------------------------------------------

/// The unit placed on the work queue. One per fresh track in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkMessage {
    pub job_id: JobId,
    pub track: Track,
    /// Equal to the track's identity. A redelivered message carries the
    /// same key, which is what lets the job counter ignore it.
    pub idempotency_key: TrackId,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkMessage {
    pub fn new(job_id: JobId, track: Track) -> Self {
        Self {
            job_id,
            idempotency_key: track.track_id.clone(),
            track,
            enqueued_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dead Letter
// ---------------------------------------------------------------------------

/// A track that could not be resolved. Terminal, written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub track: Track,
    pub job_id: JobId,
    pub failure_reason: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(job_id: JobId, track: Track, failure_reason: impl Into<String>) -> Self {
        Self {
            track,
            job_id,
            failure_reason: failure_reason.into(),
            timestamp: Utc::now(),
        }
    }
}
