//! Track types and the track fetcher
//!
//! A [`TrackSource`] names one upstream song (audio URL plus display
//! metadata). The fetcher downloads the audio, keeps the full byte
//! buffer around for the download endpoint, and hands the bytes to the
//! segmenter.

use crate::error::{Error, Result};
use crate::segmenter::FfmpegSegmenter;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// One upstream song: where to download it and what to call it
#[derive(Debug, Clone)]
pub struct TrackSource {
    pub url: String,
    pub name: String,
    pub artist: String,
    pub album: String,
}

/// Human-visible track metadata, served by the front-end as JSON
#[derive(Debug, Clone, Serialize)]
pub struct TrackInfo {
    pub name: String,
    pub artist: String,
    pub album: String,
}

impl From<&TrackSource> for TrackInfo {
    fn from(source: &TrackSource) -> Self {
        Self {
            name: source.name.clone(),
            artist: source.artist.clone(),
            album: source.album.clone(),
        }
    }
}

/// One segment as produced by the segmenter, before it enters a window
#[derive(Debug, Clone)]
pub struct RawSegment {
    /// Segment file name emitted by the segmenter
    pub uri: String,
    /// Duration in seconds
    pub duration: f64,
    /// MPEG-TS bytes
    pub data: Bytes,
}

/// A downloaded and segmented track
#[derive(Debug)]
pub struct FetchedTrack {
    /// Ordered segments
    pub segments: Vec<RawSegment>,
    /// The full source audio, kept for the download endpoint
    pub data: Bytes,
}

/// Supplies batches of upcoming tracks for a station
#[async_trait]
pub trait TrackProvider: Send + Sync {
    async fn next_tracks(&self, station_id: &str) -> Result<Vec<TrackSource>>;
}

/// Downloads one track and splits it into segments
#[async_trait]
pub trait TrackFetcher: Send + Sync {
    async fn fetch_and_segment(&self, source: &TrackSource) -> Result<FetchedTrack>;
}

/// Fetcher backed by a dedicated HTTP client and the ffmpeg segmenter
pub struct HttpTrackFetcher {
    http: reqwest::Client,
    segmenter: FfmpegSegmenter,
}

impl HttpTrackFetcher {
    pub fn new(segmenter: FfmpegSegmenter) -> Result<Self> {
        Ok(Self {
            http: download_client()?,
            segmenter,
        })
    }
}

#[async_trait]
impl TrackFetcher for HttpTrackFetcher {
    async fn fetch_and_segment(&self, source: &TrackSource) -> Result<FetchedTrack> {
        debug!(url = %source.url, "downloading track");

        let response = self.http.get(&source.url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::UpstreamStatus(response.status().as_u16()));
        }

        let data = response.bytes().await?;
        debug!(url = %source.url, bytes = data.len(), "track downloaded");

        let segments = self.segmenter.split(data.clone()).await?;
        Ok(FetchedTrack { segments, data })
    }
}

/// HTTP client for track downloads.
///
/// The delivery CDN is sensitive to proxy rewrites and expects
/// aggressive connection reuse, so this client bypasses any ambient
/// proxy configuration and pins its transport timeouts.
fn download_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .connect_timeout(Duration::from_secs(10))
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(30)
        .build()?;
    Ok(client)
}
