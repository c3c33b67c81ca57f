//! Job records: one per dispatched batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidArgument(format!("bad job id {s:?}: {e}")))
    }
}

/// Lifecycle of a job. `Running -> Completed` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
}

impl JobStatus {
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        matches!((self, to), (JobStatus::Running, JobStatus::Completed))
    }

    pub fn is_terminal(self) -> bool {
        self == JobStatus::Completed
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            _ => Err(Error::Other(format!("unknown job status: {s}"))),
        }
    }
}

/// Where a batch came from. Carried through to the completion event so the
/// downstream consumer can find the source chart again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMeta {
    #[serde(default)]
    pub source_bucket: Option<String>,
    #[serde(default)]
    pub source_key: Option<String>,
    #[serde(default)]
    pub chart_name: Option<String>,
}

impl JobMeta {
    pub fn source(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            source_bucket: Some(bucket.into()),
            source_key: Some(key.into()),
            chart_name: None,
        }
    }

    pub fn chart_name(mut self, name: impl Into<String>) -> Self {
        self.chart_name = Some(name.into());
        self
    }
}

/// Processing state of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub expected_count: i64,
    /// Distinct idempotency keys counted so far. Never exceeds
    /// `expected_count`.
    pub processed_count: i64,
    pub status: JobStatus,
    pub meta: JobMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly once, on the Running -> Completed transition.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(expected_count: i64, meta: JobMeta) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            expected_count,
            processed_count: 0,
            status: JobStatus::Running,
            meta,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn remaining(&self) -> i64 {
        (self.expected_count - self.processed_count).max(0)
    }

    /// Every expected unit has been counted.
    pub fn is_due(&self) -> bool {
        self.processed_count >= self.expected_count
    }
}
