//! Content addressing for tracks.
//!
//! A track's identity is the SHA-256 of its normalized `artist::title`.
//! Two descriptions of the same song that differ only by case, punctuation
//! or whitespace hash to the same [`TrackId`], which is the primary key of
//! every track record and the idempotency key of every work message.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Hex length of a SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 digest identifying a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackId(String);

impl TrackId {
    /// Parse a digest produced elsewhere (a stored record, a queue payload).
    pub fn from_hex(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.len() != DIGEST_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidArgument(format!(
                "track id must be {DIGEST_HEX_LEN} hex characters, got {s:?}"
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TrackId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl From<TrackId> for String {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

/// Canonical form of a title or artist: lowercase, letters/digits/spaces
/// only, single spaces, no leading or trailing whitespace.
///
/// Underscores count as punctuation and the result is trimmed after
/// punctuation is removed. Digests built on a normalizer that keeps `_`
/// or skips that trim differ from these, so records keyed that way do not
/// match.
pub fn normalize(s: &str) -> String {
    let kept: String = s
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute the identity of a `(title, artist)` pair.
///
/// Empty inputs are not rejected here; they normalize to the empty string.
pub fn identity(title: &str, artist: &str) -> TrackId {
    let combined = format!("{}::{}", normalize(artist), normalize(title));
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    TrackId(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_case_punctuation_and_spacing() {
        assert_eq!(normalize("  Let   It Be! "), "let it be");
        assert_eq!(normalize("AC/DC"), "acdc");
        assert_eq!(normalize("Beyoncé"), "beyoncé");
        assert_eq!(normalize("\tDon't\nStop  "), "dont stop");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("?!"), "");
    }

    #[test]
    fn underscores_are_dropped_and_result_is_trimmed() {
        assert_eq!(normalize("snake_case"), "snakecase");
        assert_eq!(normalize("intro - "), "intro");
        assert_eq!(normalize("_ hidden _"), "hidden");
    }

    #[test]
    fn identity_matches_known_digest() {
        // sha256("the beatles::let it be")
        let mut hasher = Sha256::new();
        hasher.update(b"the beatles::let it be");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(identity("Let It Be", "The Beatles").as_str(), expected);
    }

    #[test]
    fn identity_is_case_and_punctuation_insensitive() {
        assert_eq!(
            identity("Let It Be", "The Beatles"),
            identity("let it be", "THE BEATLES")
        );
        assert_eq!(
            identity("Let It Be!", "The  Beatles"),
            identity("  let it be", "the beatles.")
        );
    }

    #[test]
    fn artist_and_title_are_not_interchangeable() {
        assert_ne!(identity("Toman", "Verano"), identity("Verano", "Toman"));
    }

    #[test]
    fn from_hex_validates_length_and_alphabet() {
        let id = identity("Verano en NY", "Toman");
        assert_eq!(TrackId::from_hex(id.as_str()).unwrap(), id);
        assert_eq!(TrackId::from_hex(id.as_str().to_uppercase()).unwrap(), id);
        assert!(TrackId::from_hex("abc").is_err());
        assert!(TrackId::from_hex("z".repeat(64)).is_err());
    }

    #[test]
    fn serde_round_trips_and_rejects_garbage() {
        let id = identity("Despacito", "Luis Fonsi");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: TrackId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<TrackId>("\"not-a-digest\"").is_err());
    }
}
