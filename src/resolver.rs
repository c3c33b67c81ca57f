//! External catalog lookup capability.

use async_trait::async_trait;
use thiserror::Error;

/// Why a track could not be resolved.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The catalog answered and has no match. Definitive.
    #[error("no catalog match for {artist} - {title}")]
    NotFound { title: String, artist: String },

    /// The catalog could not answer right now.
    #[error("resolver unavailable: {0}")]
    Transient(String),
}

/// Matches a `(title, artist)` pair against an external catalog.
///
/// On success returns the enrichment to store with the track (video id,
/// canonical URL, ...). Its shape is owned by the implementation.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn search(&self, title: &str, artist: &str) -> Result<serde_json::Value, ResolveError>;
}
