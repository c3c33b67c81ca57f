//! Work queue seam.
//!
//! Delivery is at-least-once: a message handed back with [`WorkQueue::retry`]
//! (or never acked) shows up again, possibly on another worker.
//! [`MemoryQueue`] is a bounded in-process channel; the pgmq-backed
//! implementation lives in [`crate::db::pgmq`].

pub mod memory;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::WorkMessage;

pub use memory::MemoryQueue;

/// A message handed to a worker, plus what the queue needs to ack it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: WorkMessage,
    /// Queue-specific handle (pgmq msg_id, or a local sequence number).
    pub receipt: i64,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, message: &WorkMessage) -> Result<()>;

    /// Next delivery. `Ok(None)` means nothing is available right now (or
    /// the queue is closed); the caller decides whether to poll again.
    async fn consume(&self) -> Result<Option<Delivery>>;

    /// The delivery was handled; never deliver it again.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// The delivery failed transiently; make it available again.
    async fn retry(&self, delivery: Delivery) -> Result<()>;
}

/// What `publish` does when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Wait for room.
    #[default]
    Block,
    /// Fail with [`Error::Queue`].
    Reject,
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(BackpressurePolicy::Block),
            "reject" => Ok(BackpressurePolicy::Reject),
            other => Err(Error::Config(format!(
                "unknown backpressure policy {other:?} (expected block or reject)"
            ))),
        }
    }
}
