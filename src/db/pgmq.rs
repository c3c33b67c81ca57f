//! Work queue on pgmq, via direct SQLx calls to its SQL functions
//! (`pgmq.create`, `pgmq.send`, `pgmq.read`, `pgmq.archive`, `pgmq.set_vt`).
//!
//! Delivery is at-least-once: a read message becomes invisible for the
//! visibility timeout and reappears unless archived. pgmq's `read_ct` is
//! the delivery attempt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use sqlx::types::Json;
use tracing::{debug, error};

use super::Db;
use crate::error::{Error, Result};
use crate::model::WorkMessage;
use crate::queue::{Delivery, WorkQueue};
use crate::telemetry::metrics;

/// A message read from a pgmq queue.
#[derive(Debug, sqlx::FromRow)]
struct PgmqRow {
    msg_id: i64,
    read_ct: i32,
    enqueued_at: DateTime<Utc>,
    message: serde_json::Value,
}

/// A named pgmq queue carrying [`WorkMessage`]s.
#[derive(Clone)]
pub struct PgmqQueue {
    db: Db,
    name: String,
    visibility_timeout: i32,
    retry_delay: i32,
}

impl PgmqQueue {
    /// Open (creating if needed) the queue `name`.
    pub async fn open(db: Db, name: impl Into<String>, visibility_timeout: i32) -> Result<Self> {
        let queue = Self {
            db,
            name: name.into(),
            visibility_timeout,
            retry_delay: 0,
        };
        sqlx::query("SELECT pgmq.create($1)")
            .bind(&queue.name)
            .execute(queue.db.pool())
            .await?;
        queue.record("create");
        Ok(queue)
    }

    /// Seconds a retried message stays invisible before redelivery.
    pub fn retry_delay(mut self, seconds: i32) -> Self {
        self.retry_delay = seconds.max(0);
        self
    }

    async fn archive(&self, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(&self.name)
            .bind(msg_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| Error::Queue(format!("archive in {}: {e}", self.name)))?;
        self.record("archive");
        Ok(())
    }

    fn record(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}

#[async_trait]
impl WorkQueue for PgmqQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: &WorkMessage) -> Result<()> {
        let (msg_id,): (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, 0)")
            .bind(&self.name)
            .bind(Json(message))
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| Error::Queue(format!("send to {}: {e}", self.name)))?;
        debug!(queue = %self.name, msg_id, "message sent");
        self.record("send");
        Ok(())
    }

    async fn consume(&self) -> Result<Option<Delivery>> {
        let row: Option<PgmqRow> = sqlx::query_as(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, 1)",
        )
        .bind(&self.name)
        .bind(self.visibility_timeout)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| Error::Queue(format!("read from {}: {e}", self.name)))?;

        let Some(row) = row else {
            self.record("read_empty");
            return Ok(None);
        };
        self.record("read");

        let message = match serde_json::from_value::<WorkMessage>(row.message) {
            Ok(message) => message,
            Err(e) => {
                // Unreadable payloads would be redelivered forever.
                error!(
                    queue = %self.name,
                    msg_id = row.msg_id,
                    enqueued_at = %row.enqueued_at,
                    error = %e,
                    "archiving malformed message"
                );
                self.archive(row.msg_id).await?;
                return Ok(None);
            }
        };
        Ok(Some(Delivery {
            message,
            receipt: row.msg_id,
            attempt: row.read_ct.max(1) as u32,
        }))
    }

    /// Archives rather than deletes, keeping processed messages for audit.
    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.archive(delivery.receipt).await
    }

    async fn retry(&self, delivery: Delivery) -> Result<()> {
        sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(&self.name)
            .bind(delivery.receipt)
            .bind(self.retry_delay)
            .execute(self.db.pool())
            .await
            .map_err(|e| Error::Queue(format!("set_vt in {}: {e}", self.name)))?;
        self.record("retry");
        Ok(())
    }
}
