//! High-level upstream client
//!
//! [`StationClient`] owns the credentials and wraps every API call with
//! the expired-token recovery: when the upstream reports the
//! invalid-token sentinel, the client re-authenticates once and retries
//! the call once. Callers (the stream engine in particular) never see
//! auth at all.

use crate::api::StationApi;
use crate::error::{Error, Result};
use crate::models::{PlaylistItem, StationPlaylist};
use crate::track::{TrackProvider, TrackSource};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Quality preference, best first
pub const QUALITY_ORDER: [&str; 3] = ["highQuality", "mediumQuality", "lowQuality"];

/// Upstream account credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Authenticated client for the track-delivery API
pub struct StationClient {
    api: RwLock<StationApi>,
    credentials: Credentials,
}

impl StationClient {
    /// Authenticate against `base_url` and return a ready client
    pub async fn connect(base_url: impl Into<String>, credentials: Credentials) -> Result<Self> {
        let mut api = StationApi::new(base_url)?;
        api.login(&credentials.username, &credentials.password)
            .await?;

        info!(username = %credentials.username, "connected to upstream");
        Ok(Self {
            api: RwLock::new(api),
            credentials,
        })
    }

    /// Create (or look up) a station from a music token and return its id
    pub async fn create_station(&self, music_token: &str) -> Result<String> {
        // The read guard must not live into the retry arm, where reauth
        // takes the write side.
        let first = self.api.read().await.create_station(music_token).await;
        let result = match first {
            Err(Error::UpstreamAuthExpired) => {
                self.reauth().await?;
                self.api.read().await.create_station(music_token).await?
            }
            other => other?,
        };
        Ok(result.station_id)
    }

    /// Fetch the next batch of playable tracks for a station.
    ///
    /// Applies the quality preference per item and skips items without
    /// any audio URL. Fails with [`Error::NoTracksFound`] when the batch
    /// ends up empty.
    pub async fn station_tracks(&self, station_id: &str) -> Result<Vec<TrackSource>> {
        let first = self.api.read().await.station_playlist(station_id).await;
        let playlist = match first {
            Err(Error::UpstreamAuthExpired) => {
                self.reauth().await?;
                self.api.read().await.station_playlist(station_id).await?
            }
            other => other?,
        };

        let tracks = select_tracks(playlist);
        if tracks.is_empty() {
            return Err(Error::NoTracksFound);
        }
        Ok(tracks)
    }

    async fn reauth(&self) -> Result<()> {
        info!("upstream token expired, re-authenticating");
        let mut api = self.api.write().await;
        api.login(&self.credentials.username, &self.credentials.password)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TrackProvider for StationClient {
    async fn next_tracks(&self, station_id: &str) -> Result<Vec<TrackSource>> {
        self.station_tracks(station_id).await
    }
}

fn select_tracks(playlist: StationPlaylist) -> Vec<TrackSource> {
    let mut tracks = Vec::with_capacity(playlist.items.len());
    for item in playlist.items {
        let url = match preferred_audio_url(&item) {
            Some(url) => url.to_string(),
            None => {
                debug!(song = %item.song_name, "no playable audio url, skipping item");
                continue;
            }
        };

        tracks.push(TrackSource {
            url,
            name: item.song_name,
            artist: item.artist_name,
            album: item.album_name,
        });
    }
    tracks
}

fn preferred_audio_url(item: &PlaylistItem) -> Option<&str> {
    QUALITY_ORDER
        .iter()
        .find_map(|quality| item.audio_url_map.get(*quality))
        .map(|audio| audio.audio_url.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioUrl;
    use std::collections::HashMap;

    fn item_with_qualities(qualities: &[&str]) -> PlaylistItem {
        let mut map = HashMap::new();
        for quality in qualities {
            map.insert(
                quality.to_string(),
                AudioUrl {
                    audio_url: format!("https://cdn.example.com/{quality}.m4a"),
                    bitrate: None,
                    encoding: None,
                },
            );
        }
        PlaylistItem {
            song_name: "Song".into(),
            artist_name: "Artist".into(),
            album_name: "Album".into(),
            audio_url_map: map,
        }
    }

    #[test]
    fn prefers_high_quality() {
        let item = item_with_qualities(&["lowQuality", "highQuality", "mediumQuality"]);
        assert_eq!(
            preferred_audio_url(&item),
            Some("https://cdn.example.com/highQuality.m4a")
        );
    }

    #[test]
    fn falls_back_to_lower_quality() {
        let item = item_with_qualities(&["lowQuality"]);
        assert_eq!(
            preferred_audio_url(&item),
            Some("https://cdn.example.com/lowQuality.m4a")
        );
    }

    #[test]
    fn skips_items_without_audio() {
        let playlist = StationPlaylist {
            items: vec![item_with_qualities(&[]), item_with_qualities(&["mediumQuality"])],
        };
        let tracks = select_tracks(playlist);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].url, "https://cdn.example.com/mediumQuality.m4a");
    }
}
