//! Metric instrument factories for trackq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"trackq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("trackq")
}

/// Counter: dedup decisions per candidate track.
/// Labels: `result` ("fresh" | "known" | "invalid" | "batch_duplicate" |
/// "lookup_failed" | "lookup_failed_included" | "lookup_failed_excluded").
pub fn tracks_filtered() -> Counter<u64> {
    meter()
        .u64_counter("trackq.tracks.filtered")
        .with_description("Candidate tracks seen by the dedup filter")
        .build()
}

/// Counter: jobs created by the dispatcher.
pub fn jobs_created() -> Counter<u64> {
    meter()
        .u64_counter("trackq.jobs.created")
        .with_description("Number of jobs created")
        .build()
}

/// Counter: Running -> Completed transitions.
pub fn jobs_completed() -> Counter<u64> {
    meter()
        .u64_counter("trackq.jobs.completed")
        .with_description("Number of jobs completed")
        .build()
}

/// Counter: completion notifications that could not be delivered.
pub fn notifications_failed() -> Counter<u64> {
    meter()
        .u64_counter("trackq.notifications.failed")
        .with_description("Completion notifications that failed to send")
        .build()
}

/// Counter: work messages published.
/// Labels: `result` ("ok" | "error").
pub fn messages_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("trackq.messages.dispatched")
        .with_description("Work messages published by the dispatcher")
        .build()
}

/// Counter: deliveries handled by workers.
/// Labels: `outcome` ("resolved" | "dead_lettered" | "duplicate" |
/// "late" | "retry").
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("trackq.items.processed")
        .with_description("Work message deliveries handled by workers")
        .build()
}

/// Counter: dead-letter entries written.
/// Labels: `reason` ("not_found" | "retries_exhausted").
pub fn dead_letters() -> Counter<u64> {
    meter()
        .u64_counter("trackq.dead_letters")
        .with_description("Tracks routed to the dead-letter sink")
        .build()
}

/// Counter: queue-level operations (send, read, archive, retry).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("trackq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("trackq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
