//! Events published on the outbound notification channel.
//!
//! Shaped like an event-bus entry (source, detail type, detail) so the
//! consumer that builds playlists can subscribe by source and type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Job, JobId, JobMeta};

/// Source attached to every event emitted by the pipeline.
pub const EVENT_SOURCE: &str = "trackq.orchestrator";

/// Detail type of the one event a job ever produces.
pub const JOB_COMPLETED: &str = "Job Completed";

/// A structured event emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub detail: JobCompletedDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletedDetail {
    pub job_id: JobId,
    pub expected_count: i64,
    pub processed_count: i64,
    #[serde(flatten)]
    pub meta: JobMeta,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CompletionEvent {
    pub fn for_job(job: &Job) -> Self {
        Self {
            source: EVENT_SOURCE.to_string(),
            detail_type: JOB_COMPLETED.to_string(),
            detail: JobCompletedDetail {
                job_id: job.job_id,
                expected_count: job.expected_count,
                processed_count: job.processed_count,
                meta: job.meta.clone(),
                created_at: job.created_at,
                completed_at: job.completed_at,
            },
        }
    }
}
