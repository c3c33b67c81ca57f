//! Completion events and dead letters, persisted in Postgres.
//!
//! Completion events go to `job_events` and are announced with
//! `pg_notify('job_completed', <job id>)` in the same transaction, so
//! listeners only hear about committed events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use super::Db;
use crate::error::Result;
use crate::event::CompletionEvent;
use crate::model::{DeadLetterEntry, Job, JobId, Track};
use crate::notify::{CompletionNotifier, DeadLetterRouter};

/// Channel name used for completion notifications.
pub const JOB_COMPLETED_CHANNEL: &str = "job_completed";

#[async_trait]
impl CompletionNotifier for Db {
    async fn notify(&self, job: &Job) -> Result<()> {
        let event = CompletionEvent::for_job(job);
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO job_events (job_id, detail_type, payload) VALUES ($1, $2, $3)
             ON CONFLICT (job_id, detail_type) DO NOTHING",
        )
        .bind(job.job_id.0)
        .bind(&event.detail_type)
        .bind(Json(&event))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(JOB_COMPLETED_CHANNEL)
                .bind(job.job_id.0.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// One entry per track per job; a repeated send keeps the first.
#[async_trait]
impl DeadLetterRouter for Db {
    async fn send(&self, entry: DeadLetterEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO dead_letters (job_id, track_id, track, failure_reason, failed_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (job_id, track_id) DO NOTHING",
        )
        .bind(entry.job_id.0)
        .bind(entry.track.track_id.as_str())
        .bind(Json(&entry.track))
        .bind(&entry.failure_reason)
        .bind(entry.timestamp)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    job_id: Uuid,
    track: Json<Track>,
    failure_reason: String,
    failed_at: DateTime<Utc>,
}

impl Db {
    /// Dead letters recorded for a job, oldest first.
    pub async fn dead_letters_for(&self, job_id: JobId) -> Result<Vec<DeadLetterEntry>> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            "SELECT job_id, track, failure_reason, failed_at
             FROM dead_letters WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id.0)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DeadLetterEntry {
                track: row.track.0,
                job_id: JobId(row.job_id),
                failure_reason: row.failure_reason,
                timestamp: row.failed_at,
            })
            .collect())
    }

    /// The stored completion event for a job, if it has completed.
    pub async fn completion_event(&self, job_id: JobId) -> Result<Option<CompletionEvent>> {
        let row: Option<(Json<CompletionEvent>,)> = sqlx::query_as(
            "SELECT payload FROM job_events WHERE job_id = $1 AND detail_type = $2",
        )
        .bind(job_id.0)
        .bind(crate::event::JOB_COMPLETED)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(Json(event),)| event))
    }
}
