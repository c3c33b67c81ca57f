//! Error types for trackq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad parameters for an operation. Fatal to the call, never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Backing-store hiccup. Callers retry with backoff.
    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same call later may succeed.
    ///
    /// Database errors count only when they are connection or pool
    /// failures, or a server error in SQLSTATE class 08 (connection
    /// exception) or 40 (transaction rollback, e.g. serialization failure
    /// or deadlock). Constraint violations, decode and protocol errors are
    /// permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientStore(_) | Error::Queue(_) | Error::Io(_) => true,
            Error::Database(e) => sqlx_is_transient(e),
            _ => false,
        }
    }
}

fn sqlx_is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with("08") || code.starts_with("40")),
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_queue_failures_are_transient() {
        assert!(Error::TransientStore("reset".into()).is_transient());
        assert!(Error::Queue("full".into()).is_transient());
        assert!(Error::Io(std::io::Error::other("broken pipe")).is_transient());
    }

    #[test]
    fn only_connection_level_sqlx_errors_are_transient() {
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(Error::Database(sqlx::Error::PoolClosed).is_transient());
        assert!(Error::Database(sqlx::Error::Io(std::io::Error::other("reset"))).is_transient());

        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!Error::Database(sqlx::Error::Protocol("bad frame".into())).is_transient());
        assert!(!Error::Database(sqlx::Error::ColumnNotFound("status".into())).is_transient());
    }

    #[test]
    fn caller_errors_are_permanent() {
        assert!(!Error::InvalidArgument("n".into()).is_transient());
        assert!(!Error::NotFound("job".into()).is_transient());
        assert!(!Error::Config("x".into()).is_transient());
    }
}
