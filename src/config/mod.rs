//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on malformed values. The database URL
//! is wrapped in `secrecy::SecretString` to keep credentials out of logs.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::dedup::LookupFailurePolicy;
use crate::engine::WorkerConfig;
use crate::error::{Error, Result};
use crate::queue::BackpressurePolicy;

#[derive(Debug)]
pub struct Config {
    /// Postgres URL. `None` runs the pipeline on in-process backends.
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Number of concurrent workers.
    pub workers: usize,
    /// pgmq queue carrying work messages.
    pub queue_name: String,
    /// Bound of the in-process work queue.
    pub queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
    pub lookup_failure: LookupFailurePolicy,
    /// Deliveries of one message before it is dead-lettered.
    pub max_attempts: u32,
    /// pgmq visibility timeout, in seconds.
    pub visibility_timeout: i32,
    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,
}

impl Config {
    /// Load `.env` if present, then read the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            database_url: lookup("DATABASE_URL").map(SecretString::from),
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            workers: parsed(&lookup, "TRACKQ_WORKERS", 4)?,
            queue_name: lookup("TRACKQ_QUEUE").unwrap_or_else(|| "tracks".to_string()),
            queue_capacity: parsed(&lookup, "TRACKQ_QUEUE_CAPACITY", 256)?,
            backpressure: parsed(&lookup, "TRACKQ_BACKPRESSURE", BackpressurePolicy::Block)?,
            lookup_failure: parsed(
                &lookup,
                "TRACKQ_LOOKUP_FAILURE",
                LookupFailurePolicy::Include,
            )?,
            max_attempts: parsed(&lookup, "TRACKQ_MAX_ATTEMPTS", 3)?,
            visibility_timeout: parsed(&lookup, "TRACKQ_VISIBILITY_TIMEOUT", 60)?,
            poll_interval: Duration::from_millis(parsed(&lookup, "TRACKQ_POLL_INTERVAL_MS", 1000)?),
        }
        .validated()?)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            workers: self.workers,
            max_attempts: self.max_attempts,
            poll_interval: self.poll_interval,
        }
    }

    fn validated(self) -> Result<Self> {
        if self.workers == 0 {
            return Err(Error::Config("TRACKQ_WORKERS must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "TRACKQ_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "TRACKQ_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
    }
}
