//! # trackq
//!
//! Fan-out/fan-in pipeline for chart tracks.
//!
//! A batch of tracks is deduplicated against a content-addressed store,
//! fanned out as one work message per fresh track, resolved by a pool of
//! workers, and fanned back in by an idempotent per-job counter that emits
//! exactly one completion event per job.
//!
//! Storage, queueing and notification sit behind traits with in-process
//! implementations ([`store::MemoryStore`], [`queue::MemoryQueue`],
//! [`notify::ChannelNotifier`]) and Postgres ones ([`db::Db`],
//! [`db::pgmq::PgmqQueue`]).

pub mod chart;
pub mod config;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod event;
pub mod identity;
pub mod model;
pub mod notify;
pub mod queue;
pub mod resolver;
pub mod store;
pub mod telemetry;
pub mod tracker;
