//! Pipeline engine: the dispatcher fans batches out, the worker pool
//! consumes them.

pub mod dispatch;
pub mod worker;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use worker::{ItemOutcome, WorkerConfig, WorkerPool};
