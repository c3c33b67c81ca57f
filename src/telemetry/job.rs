//! Span helpers for dispatch and per-item processing.

use tracing::Span;

use crate::identity::TrackId;
use crate::model::JobId;

/// Span covering one `dispatch` call. `job.id` is filled in once a job
/// exists.
pub fn start_dispatch_span(batch_size: usize) -> Span {
    tracing::info_span!(
        "batch.dispatch",
        "batch.size" = batch_size,
        "job.id" = tracing::field::Empty,
    )
}

/// Span covering one delivery of a work message.
///
/// `item.outcome` is declared empty and set via [`record_outcome`].
pub fn start_item_span(worker: usize, job_id: JobId, key: &TrackId, attempt: u32) -> Span {
    tracing::info_span!(
        "item.process",
        "worker.id" = worker,
        "job.id" = %job_id,
        "item.key" = key.short(),
        "item.attempt" = attempt,
        "item.outcome" = tracing::field::Empty,
    )
}

pub fn record_job_id(span: &Span, job_id: JobId) {
    span.record("job.id", tracing::field::display(job_id));
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("item.outcome", outcome);
}
