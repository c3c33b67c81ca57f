//! Deduplication against previously seen tracks.
//!
//! Every candidate is keyed by its identity digest and checked with one
//! point lookup. What happens when that lookup fails is a declared
//! [`LookupFailurePolicy`], not a buried default.

use std::collections::HashSet;
use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identity::TrackId;
use crate::model::Track;
use crate::store::TrackStore;
use crate::telemetry::metrics;

/// What `filter` does with a candidate whose existence lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupFailurePolicy {
    /// Treat the candidate as new. Risks duplicate work, never loses a
    /// track.
    #[default]
    Include,
    /// Drop the candidate. Risks losing a track, never duplicates work.
    Exclude,
    /// Abort the whole filter with the store error.
    Propagate,
}

impl std::fmt::Display for LookupFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LookupFailurePolicy::Include => "include",
            LookupFailurePolicy::Exclude => "exclude",
            LookupFailurePolicy::Propagate => "propagate",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LookupFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "include" => Ok(LookupFailurePolicy::Include),
            "exclude" => Ok(LookupFailurePolicy::Exclude),
            "propagate" => Ok(LookupFailurePolicy::Propagate),
            other => Err(Error::Config(format!(
                "unknown lookup failure policy {other:?} (expected include, exclude or propagate)"
            ))),
        }
    }
}

/// Identity-keyed view over a [`TrackStore`].
#[derive(Clone)]
pub struct DedupStore {
    store: Arc<dyn TrackStore>,
    on_lookup_failure: LookupFailurePolicy,
}

impl DedupStore {
    pub fn new(store: Arc<dyn TrackStore>, on_lookup_failure: LookupFailurePolicy) -> Self {
        Self {
            store,
            on_lookup_failure,
        }
    }

    pub fn policy(&self) -> LookupFailurePolicy {
        self.on_lookup_failure
    }

    /// The stored record for `id`, if any.
    pub async fn exists(&self, id: &TrackId) -> Result<Option<Track>> {
        self.store.get_track(id).await
    }

    /// Persist a (typically enriched) track under its identity.
    pub async fn put(&self, track: &Track) -> Result<()> {
        self.store.put_track(track).await
    }

    /// Keep only candidates that are complete, not yet stored, and not
    /// repeated earlier in the same batch. Read-only.
    pub async fn filter(&self, candidates: Vec<Track>) -> Result<Vec<Track>> {
        let total = candidates.len();
        let mut seen: HashSet<TrackId> = HashSet::with_capacity(total);
        let mut fresh = Vec::with_capacity(total);

        for mut track in candidates {
            if !track.is_complete() {
                debug!(title = %track.title, artist = %track.artist, "skipping incomplete track");
                record_filtered("invalid");
                continue;
            }

            let id = track.rehash().clone();
            if !seen.insert(id.clone()) {
                debug!(track = %track, id = id.short(), "duplicate within batch");
                record_filtered("batch_duplicate");
                continue;
            }

            match self.store.get_track(&id).await {
                Ok(None) => {
                    debug!(track = %track, id = id.short(), "new track");
                    record_filtered("fresh");
                    fresh.push(track);
                }
                Ok(Some(_)) => {
                    debug!(track = %track, id = id.short(), "track already known");
                    record_filtered("known");
                }
                Err(e) => match self.on_lookup_failure {
                    LookupFailurePolicy::Include => {
                        warn!(track = %track, id = id.short(), error = %e, "lookup failed, including track");
                        record_filtered("lookup_failed_included");
                        fresh.push(track);
                    }
                    LookupFailurePolicy::Exclude => {
                        warn!(track = %track, id = id.short(), error = %e, "lookup failed, excluding track");
                        record_filtered("lookup_failed_excluded");
                    }
                    LookupFailurePolicy::Propagate => {
                        record_filtered("lookup_failed");
                        return Err(e);
                    }
                },
            }
        }

        info!(total, fresh = fresh.len(), "filtered batch");
        Ok(fresh)
    }
}

fn record_filtered(result: &'static str) {
    metrics::tracks_filtered().add(1, &[KeyValue::new("result", result)]);
}
