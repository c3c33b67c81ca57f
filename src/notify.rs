//! Outbound channels: the single completion event per job, and the
//! dead-letter sink for tracks that could not be resolved.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::event::CompletionEvent;
use crate::model::{DeadLetterEntry, Job};

/// Receives the Running -> Completed transition of a job, exactly once.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, job: &Job) -> Result<()>;
}

/// Append-only sink for unresolvable tracks.
#[async_trait]
pub trait DeadLetterRouter: Send + Sync {
    async fn send(&self, entry: DeadLetterEntry) -> Result<()>;
}

/// Publishes completion events on an in-process channel.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<CompletionEvent>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CompletionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CompletionNotifier for ChannelNotifier {
    async fn notify(&self, job: &Job) -> Result<()> {
        self.tx
            .send(CompletionEvent::for_job(job))
            .map_err(|_| Error::Queue("completion channel closed".to_string()))
    }
}

/// Collects dead letters on an in-process channel.
#[derive(Clone)]
pub struct ChannelDeadLetters {
    tx: mpsc::UnboundedSender<DeadLetterEntry>,
}

impl ChannelDeadLetters {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeadLetterEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DeadLetterRouter for ChannelDeadLetters {
    async fn send(&self, entry: DeadLetterEntry) -> Result<()> {
        self.tx
            .send(entry)
            .map_err(|_| Error::Queue("dead-letter channel closed".to_string()))
    }
}
