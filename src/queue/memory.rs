//! Bounded in-process work queue on a tokio mpsc channel.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use super::{BackpressurePolicy, Delivery, WorkQueue};
use crate::error::{Error, Result};
use crate::model::WorkMessage;
use crate::telemetry::metrics;

struct Envelope {
    message: WorkMessage,
    attempt: u32,
}

/// Shared-consumer queue: many workers pull from one receiver.
pub struct MemoryQueue {
    name: String,
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<mpsc::Receiver<Envelope>>,
    policy: BackpressurePolicy,
    next_receipt: AtomicI64,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, capacity: usize, policy: BackpressurePolicy) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: name.into(),
            tx,
            rx: Mutex::new(rx),
            policy,
            next_receipt: AtomicI64::new(1),
        }
    }

    /// Messages waiting to be consumed.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
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
impl WorkQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: &WorkMessage) -> Result<()> {
        let envelope = Envelope {
            message: message.clone(),
            attempt: 1,
        };
        match self.policy {
            BackpressurePolicy::Block => self
                .tx
                .send(envelope)
                .await
                .map_err(|_| Error::Queue(format!("queue {} closed", self.name)))?,
            BackpressurePolicy::Reject => self.tx.try_send(envelope).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::Queue(format!("queue {} full", self.name))
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Error::Queue(format!("queue {} closed", self.name))
                }
            })?,
        }
        self.record("send");
        Ok(())
    }

    async fn consume(&self) -> Result<Option<Delivery>> {
        let mut rx = self.rx.lock().await;
        let Some(envelope) = rx.recv().await else {
            return Ok(None);
        };
        self.record("read");
        Ok(Some(Delivery {
            message: envelope.message,
            receipt: self.next_receipt.fetch_add(1, Ordering::Relaxed),
            attempt: envelope.attempt,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        debug!(queue = %self.name, receipt = delivery.receipt, "acked");
        self.record("ack");
        Ok(())
    }

    async fn retry(&self, delivery: Delivery) -> Result<()> {
        let envelope = Envelope {
            message: delivery.message,
            attempt: delivery.attempt + 1,
        };
        self.record("retry");
        // Workers are the only consumers, so a worker blocking on a full
        // queue could stall every worker. Hand the send to a task instead.
        match self.tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                let tx = self.tx.clone();
                let name = self.name.clone();
                tokio::spawn(async move {
                    if tx.send(envelope).await.is_err() {
                        warn!(queue = %name, "queue closed before redelivery");
                    }
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Queue(format!("queue {} closed", self.name)))
            }
        }
    }
}
