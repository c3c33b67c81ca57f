//! Identity-keyed track records in Postgres.

use async_trait::async_trait;
use sqlx::types::Json;

use super::Db;
use crate::error::Result;
use crate::identity::TrackId;
use crate::model::Track;
use crate::store::TrackStore;

#[derive(sqlx::FromRow)]
struct TrackRow {
    track_id: String,
    title: String,
    artist: String,
    attributes: Json<serde_json::Map<String, serde_json::Value>>,
    enrichment: Option<serde_json::Value>,
}

impl TrackRow {
    fn try_into_track(self) -> Result<Track> {
        Ok(Track {
            track_id: TrackId::from_hex(self.track_id)?,
            title: self.title,
            artist: self.artist,
            attributes: self.attributes.0,
            enrichment: self.enrichment,
        })
    }
}

#[async_trait]
impl TrackStore for Db {
    async fn get_track(&self, id: &TrackId) -> Result<Option<Track>> {
        let row: Option<TrackRow> = sqlx::query_as(
            "SELECT track_id, title, artist, attributes, enrichment
             FROM tracks WHERE track_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(TrackRow::try_into_track).transpose()
    }

    async fn put_track(&self, track: &Track) -> Result<()> {
        sqlx::query(
            "INSERT INTO tracks (track_id, title, artist, attributes, enrichment)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (track_id) DO UPDATE
             SET title = EXCLUDED.title,
                 artist = EXCLUDED.artist,
                 attributes = EXCLUDED.attributes,
                 enrichment = COALESCE(EXCLUDED.enrichment, tracks.enrichment),
                 updated_at = now()",
        )
        .bind(track.track_id.as_str())
        .bind(&track.title)
        .bind(&track.artist)
        .bind(Json(&track.attributes))
        .bind(&track.enrichment)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
