//! Track records.

use serde::{Deserialize, Serialize};

use crate::identity::{TrackId, identity};

/// One track extracted from a chart. Identity is derived from
/// `(title, artist)`; everything else is payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub track_id: TrackId,
    pub title: String,
    pub artist: String,

    /// Chart-side fields (album, label, rank, ...). Not interpreted by the
    /// pipeline.
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,

    /// Resolver output. `None` until the track has been matched.
    #[serde(default)]
    pub enrichment: Option<serde_json::Value>,
}

impl Track {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        let title = title.into();
        let artist = artist.into();
        Self {
            track_id: identity(&title, &artist),
            title,
            artist,
            attributes: serde_json::Map::new(),
            enrichment: None,
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Both title and artist carry something besides whitespace.
    pub fn is_complete(&self) -> bool {
        !self.title.trim().is_empty() && !self.artist.trim().is_empty()
    }

    /// Recompute `track_id` from the current title and artist. Payloads
    /// arriving from outside are not trusted to carry a correct digest.
    pub fn rehash(&mut self) -> &TrackId {
        self.track_id = identity(&self.title, &self.artist);
        &self.track_id
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}
