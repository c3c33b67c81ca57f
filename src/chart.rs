//! Chart documents: blob retrieval and track extraction.
//!
//! A chart document is the JSON a scraper leaves in object storage. Its
//! layout varies between scraper revisions, so extraction looks for the
//! track list in a few known places before falling back to the first array
//! that looks like tracks.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::Track;

/// Object retrieval capability.
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Serves objects from `<root>/<bucket>/<key>` on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsBlobSource {
    root: PathBuf,
}

impl FsBlobSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobSource for FsBlobSource {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        if key.split('/').any(|part| part == "..") || bucket.contains('/') {
            return Err(Error::InvalidArgument(format!(
                "refusing object path {bucket}/{key}"
            )));
        }
        let path = self.root.join(bucket).join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {bucket}/{key}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Chart fields copied into [`Track::attributes`], as
/// `(attribute, accepted source keys)`.
const ATTRIBUTE_FIELDS: &[(&str, &[&str])] = &[
    ("album", &["album"]),
    ("genre", &["genre"]),
    ("label", &["label"]),
    ("bpm", &["bpm"]),
    ("key", &["key"]),
    ("rank", &["rank", "position"]),
    ("rating", &["rating"]),
    ("release_date", &["release_date", "released"]),
    ("url", &["url", "beatport_url"]),
    ("source_id", &["id", "beatport_id"]),
];

/// The chart's display name, if the document carries one.
pub fn chart_name(doc: &Value) -> Option<String> {
    doc.get("name").and_then(Value::as_str).map(str::to_string)
}

/// Parse raw bytes as a chart document.
pub fn parse_chart(bytes: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Every well-formed track in a chart document. Entries without a title or
/// an artist are skipped.
pub fn tracks_from_chart(doc: &Value) -> Vec<Track> {
    let Some(entries) = track_entries(doc) else {
        warn!("no track list found in chart document");
        return Vec::new();
    };

    let tracks: Vec<Track> = entries.iter().filter_map(track_from_entry).collect();
    debug!(entries = entries.len(), tracks = tracks.len(), "extracted chart tracks");
    tracks
}

fn track_entries(doc: &Value) -> Option<&Vec<Value>> {
    match doc {
        Value::Array(entries) => Some(entries),
        Value::Object(obj) => {
            if let Some(Value::Array(entries)) = obj.get("tracks") {
                return Some(entries);
            }
            if let Some(Value::Array(entries)) = doc.pointer("/playlist/tracks") {
                return Some(entries);
            }
            obj.values().find_map(|value| match value {
                Value::Array(entries) if entries.first().is_some_and(looks_like_track) => {
                    Some(entries)
                }
                _ => None,
            })
        }
        _ => None,
    }
}

fn looks_like_track(entry: &Value) -> bool {
    entry
        .as_object()
        .is_some_and(|o| o.contains_key("title") || o.contains_key("artist"))
}

fn track_from_entry(entry: &Value) -> Option<Track> {
    let obj = entry.as_object()?;

    let title = first_of(obj, &["title", "track", "name"]).and_then(text)?;
    let artist = match first_of(obj, &["artist", "artists"])? {
        Value::Array(names) => names
            .iter()
            .filter_map(text)
            .collect::<Vec<_>>()
            .join(", "),
        other => text(other)?,
    };
    if title.trim().is_empty() || artist.trim().is_empty() {
        return None;
    }

    let mut track = Track::new(title.trim(), artist.trim());
    for (attribute, keys) in ATTRIBUTE_FIELDS {
        if let Some(value) = first_of(obj, keys) {
            track.attributes.insert((*attribute).to_string(), value.clone());
        }
    }
    Some(track)
}

/// First non-null, non-empty value among `keys`.
fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => true,
    })
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_tracks_field() {
        let doc = json!({
            "name": "Beatport Top 100",
            "tracks": [
                {"title": "Verano en NY", "artist": "Toman", "position": 1, "label": "Hot Creations"},
                {"title": "Despacito", "artists": ["Luis Fonsi", "Daddy Yankee"], "rank": 2}
            ]
        });

        let tracks = tracks_from_chart(&doc);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "Verano en NY");
        assert_eq!(tracks[0].attributes["rank"], json!(1));
        assert_eq!(tracks[0].attributes["label"], json!("Hot Creations"));
        assert_eq!(tracks[1].artist, "Luis Fonsi, Daddy Yankee");
        assert_eq!(chart_name(&doc).as_deref(), Some("Beatport Top 100"));
    }

    #[test]
    fn reads_nested_playlist_and_bare_arrays() {
        let nested = json!({"playlist": {"tracks": [{"title": "A", "artist": "B"}]}});
        assert_eq!(tracks_from_chart(&nested).len(), 1);

        let bare = json!([{"track": "A", "artist": "B"}, {"name": "C", "artist": "D"}]);
        let tracks = tracks_from_chart(&bare);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].title, "C");
    }

    #[test]
    fn falls_back_to_first_track_like_array() {
        let doc = json!({
            "genres": ["house", "techno"],
            "entries": [{"title": "A", "artist": "B"}]
        });
        let tracks = tracks_from_chart(&doc);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].artist, "B");
    }

    #[test]
    fn skips_entries_missing_title_or_artist() {
        let doc = json!({"tracks": [
            {"title": "A"},
            {"artist": "B"},
            {"title": "  ", "artist": "C"},
            {"title": "D", "artist": []},
            "not an object",
            {"title": "E", "artist": "F"}
        ]});
        let tracks = tracks_from_chart(&doc);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "E");
    }

    #[test]
    fn unrecognized_documents_yield_nothing() {
        assert!(tracks_from_chart(&json!({"foo": 1})).is_empty());
        assert!(tracks_from_chart(&json!("text")).is_empty());
    }
}
