//! Fan-out: one batch in, one job plus one work message per fresh track out.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{Instrument, error, info};

use crate::chart::{self, BlobSource};
use crate::dedup::DedupStore;
use crate::error::Result;
use crate::model::{JobId, JobMeta, Track, WorkMessage};
use crate::queue::WorkQueue;
use crate::telemetry::job::{record_job_id, start_dispatch_span};
use crate::telemetry::metrics;
use crate::tracker::JobTracker;

/// What a dispatch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A job was created and `emitted` messages were published. `dropped`
    /// fresh tracks could not be published; the job's expected count was
    /// lowered to match.
    Dispatched {
        job_id: JobId,
        emitted: usize,
        dropped: usize,
    },
    /// Nothing in the batch was new. No job was created.
    NoOp { total: usize },
}

impl DispatchOutcome {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            DispatchOutcome::Dispatched { job_id, .. } => Some(*job_id),
            DispatchOutcome::NoOp { .. } => None,
        }
    }
}

/// Turns batches into jobs and work messages.
#[derive(Clone)]
pub struct Dispatcher {
    dedup: DedupStore,
    tracker: JobTracker,
    queue: Arc<dyn WorkQueue>,
}

impl Dispatcher {
    pub fn new(dedup: DedupStore, tracker: JobTracker, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            dedup,
            tracker,
            queue,
        }
    }

    /// Deduplicate `batch`, create a job for the fresh tracks and publish
    /// one message per fresh track.
    ///
    /// The job's expected count always equals the number of messages
    /// actually published: a partial publish lowers it, and a publish that
    /// fails on the first message abandons the job and returns the error.
    pub async fn dispatch(&self, batch: Vec<Track>, meta: JobMeta) -> Result<DispatchOutcome> {
        let span = start_dispatch_span(batch.len());
        self.dispatch_inner(batch, meta, span.clone())
            .instrument(span)
            .await
    }

    async fn dispatch_inner(
        &self,
        batch: Vec<Track>,
        meta: JobMeta,
        span: tracing::Span,
    ) -> Result<DispatchOutcome> {
        let total = batch.len();
        let fresh = self.dedup.filter(batch).await?;
        if fresh.is_empty() {
            info!(total, "no new tracks in batch, nothing dispatched");
            return Ok(DispatchOutcome::NoOp { total });
        }

        let planned = fresh.len();
        let job_id = self.tracker.create(planned as i64, meta).await?;
        record_job_id(&span, job_id);

        let mut emitted = 0;
        for track in fresh {
            let message = WorkMessage::new(job_id, track);
            match self.queue.publish(&message).await {
                Ok(()) => {
                    emitted += 1;
                    metrics::messages_dispatched().add(1, &[KeyValue::new("result", "ok")]);
                }
                Err(e) => {
                    metrics::messages_dispatched().add(1, &[KeyValue::new("result", "error")]);
                    error!(
                        job_id = %job_id,
                        queue = self.queue.name(),
                        emitted,
                        planned,
                        error = %e,
                        "publish failed"
                    );
                    if emitted == 0 {
                        self.tracker.abandon(job_id).await?;
                        return Err(e);
                    }
                    break;
                }
            }
        }

        if emitted < planned {
            self.tracker.correct_expected(job_id, emitted as i64).await?;
        }

        info!(job_id = %job_id, total, emitted, "batch dispatched");
        Ok(DispatchOutcome::Dispatched {
            job_id,
            emitted,
            dropped: planned - emitted,
        })
    }

    /// Fetch a chart document, extract its tracks and dispatch them. The
    /// job is tagged with the object's location and the chart's name.
    pub async fn dispatch_object(
        &self,
        blobs: &dyn BlobSource,
        bucket: &str,
        key: &str,
    ) -> Result<DispatchOutcome> {
        let bytes = blobs.get_object(bucket, key).await?;
        let doc = chart::parse_chart(&bytes)?;
        let tracks = chart::tracks_from_chart(&doc);
        info!(bucket, key, tracks = tracks.len(), "chart loaded");

        let mut meta = JobMeta::source(bucket, key);
        if let Some(name) = chart::chart_name(&doc) {
            meta = meta.chart_name(name);
        }
        self.dispatch(tracks, meta).await
    }
}
