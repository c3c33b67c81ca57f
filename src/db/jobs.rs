//! Job records and counted keys in Postgres.
//!
//! `count_once` takes the job row lock first (`SELECT ... FOR UPDATE`), so
//! every counting step for one job is serialized the same way the
//! in-process store serializes them behind its mutex. Steps for different
//! jobs never contend.
//!
//! Counted keys are deleted in the transaction that completes their job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::error::Result;
use crate::identity::TrackId;
use crate::model::{Job, JobId, JobMeta, JobStatus};
use crate::store::{CountOutcome, CountResult, JobStore, KeyState};

const JOB_COLUMNS: &str = "job_id, expected_count, processed_count, status, source_bucket, \
     source_key, chart_name, created_at, updated_at, completed_at";

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    expected_count: i64,
    processed_count: i64,
    status: String,
    source_bucket: Option<String>,
    source_key: Option<String>,
    chart_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    fn try_into_job(self) -> Result<Job> {
        Ok(Job {
            job_id: JobId(self.job_id),
            expected_count: self.expected_count,
            processed_count: self.processed_count,
            status: self.status.parse()?,
            meta: JobMeta {
                source_bucket: self.source_bucket,
                source_key: self.source_key,
                chart_name: self.chart_name,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

async fn lock_job(tx: &mut sqlx::PgConnection, id: JobId) -> Result<Option<Job>> {
    let row: Option<JobRow> =
        sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1 FOR UPDATE"))
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;
    row.map(JobRow::try_into_job).transpose()
}

/// Guarded Running -> Completed write. Returns the completed job if this
/// call performed the transition.
async fn complete_if_due(tx: &mut sqlx::PgConnection, id: JobId) -> Result<Option<Job>> {
    let row: Option<JobRow> = sqlx::query_as(&format!(
        "UPDATE jobs SET status = 'completed', completed_at = now(), updated_at = now()
         WHERE job_id = $1 AND status = 'running' AND processed_count >= expected_count
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(id.0)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    sqlx::query("DELETE FROM job_counted_keys WHERE job_id = $1")
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
    row.try_into_job().map(Some)
}

#[async_trait]
impl JobStore for Db {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (job_id, expected_count, processed_count, status, source_bucket, source_key, chart_name, created_at, updated_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(job.job_id.0)
        .bind(job.expected_count)
        .bind(job.processed_count)
        .bind(job.status.to_string())
        .bind(&job.meta.source_bucket)
        .bind(&job.meta.source_key)
        .bind(&job.meta.chart_name)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(JobRow::try_into_job).transpose()
    }

    async fn key_state(&self, id: JobId, key: &TrackId) -> Result<Option<KeyState>> {
        let row: Option<(String, bool)> = sqlx::query_as(
            "SELECT j.status, EXISTS (
                 SELECT 1 FROM job_counted_keys k
                 WHERE k.job_id = j.job_id AND k.idempotency_key = $2
             )
             FROM jobs j WHERE j.job_id = $1",
        )
        .bind(id.0)
        .bind(key.as_str())
        .fetch_optional(self.pool())
        .await?;

        let Some((status, counted)) = row else {
            return Ok(None);
        };
        let state = if status.parse::<JobStatus>()?.is_terminal() {
            KeyState::Closed
        } else if counted {
            KeyState::Counted
        } else {
            KeyState::Pending
        };
        Ok(Some(state))
    }

    async fn count_once(&self, id: JobId, key: &TrackId) -> Result<Option<CountResult>> {
        let mut tx = self.pool().begin().await?;
        let Some(mut job) = lock_job(&mut tx, id).await? else {
            return Ok(None);
        };

        let outcome = if job.status == JobStatus::Running && !job.is_due() {
            let inserted: Option<(String,)> = sqlx::query_as(
                "INSERT INTO job_counted_keys (job_id, idempotency_key) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING
                 RETURNING idempotency_key",
            )
            .bind(id.0)
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            if inserted.is_some() {
                let row: JobRow = sqlx::query_as(&format!(
                    "UPDATE jobs SET processed_count = processed_count + 1, updated_at = now()
                     WHERE job_id = $1
                     RETURNING {JOB_COLUMNS}"
                ))
                .bind(id.0)
                .fetch_one(&mut *tx)
                .await?;
                job = row.try_into_job()?;
                CountOutcome::Counted
            } else {
                CountOutcome::Duplicate
            }
        } else {
            let (seen,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM job_counted_keys WHERE job_id = $1 AND idempotency_key = $2)",
            )
            .bind(id.0)
            .bind(key.as_str())
            .fetch_one(&mut *tx)
            .await?;
            if seen {
                CountOutcome::Duplicate
            } else {
                CountOutcome::Rejected
            }
        };

        let completed = match complete_if_due(&mut tx, id).await? {
            Some(done) => {
                job = done;
                true
            }
            None => false,
        };

        tx.commit().await?;
        Ok(Some(CountResult {
            outcome,
            completed,
            job,
        }))
    }

    async fn set_expected(&self, id: JobId, expected_count: i64) -> Result<Option<(Job, bool)>> {
        let mut tx = self.pool().begin().await?;
        let Some(mut job) = lock_job(&mut tx, id).await? else {
            return Ok(None);
        };

        if job.status == JobStatus::Running && expected_count < job.expected_count {
            let row: JobRow = sqlx::query_as(&format!(
                "UPDATE jobs SET expected_count = GREATEST($2, processed_count), updated_at = now()
                 WHERE job_id = $1
                 RETURNING {JOB_COLUMNS}"
            ))
            .bind(id.0)
            .bind(expected_count)
            .fetch_one(&mut *tx)
            .await?;
            job = row.try_into_job()?;
        }

        let completed = match complete_if_due(&mut tx, id).await? {
            Some(done) => {
                job = done;
                true
            }
            None => false,
        };

        tx.commit().await?;
        Ok(Some((job, completed)))
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE job_id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
