//! # radiocast
//!
//! Re-broadcasts per-user music sessions of a track-delivery API as
//! continuous, multi-listener HLS radio channels.
//!
//! A single upstream session hands out a finite batch of per-track audio
//! URLs. `radiocast` turns that into an unbounded sliding-window HLS
//! playlist: tracks are fetched ahead, remuxed into fixed-duration
//! MPEG-TS segments by ffmpeg, and retired from the window in wall-clock
//! time. Any number of HLS clients can tune in concurrently; a station
//! nobody listens to pauses itself and resumes on the next request.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use radiocast::{Credentials, FfmpegSegmenter, HttpTrackFetcher, StationClient, Stream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(
//!         StationClient::connect(
//!             "https://tuner.example.com/api/v1",
//!             Credentials {
//!                 username: "user@example.com".into(),
//!                 password: "secret".into(),
//!             },
//!         )
//!         .await?,
//!     );
//!
//!     let station = client.create_station("G123").await?;
//!     let fetcher = Arc::new(HttpTrackFetcher::new(FfmpegSegmenter::new())?);
//!
//!     let stream = Stream::builder(station, client, fetcher).build();
//!     let (report_tx, mut report_rx) = tokio::sync::mpsc::channel(1);
//!     stream.start(report_tx).await?;
//!
//!     let playlist = stream.encode_playlist().await;
//!     println!("{}", String::from_utf8_lossy(&playlist));
//!
//!     if let Some(err) = report_rx.recv().await {
//!         eprintln!("stream died: {err}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`client`]: authenticated access to the track-delivery API, with
//!   transparent token refresh
//! - [`stream`]: the per-station engine: playlist builder, segment
//!   window and retirement worker
//! - [`segmenter`]: the ffmpeg subprocess wrapper
//! - [`pauser`]: idle detection driving pause/resume
//! - [`server`]: the axum front-end routing listeners to the engines

pub mod api;
pub mod client;
pub mod error;
pub mod models;
pub mod pauser;
pub mod segmenter;
pub mod server;
pub mod stream;
pub mod track;

mod window;

pub use client::{Credentials, StationClient, QUALITY_ORDER};
pub use error::{Error, Result};
pub use pauser::{AutoPauser, PauseResume, PauserHandle};
pub use segmenter::FfmpegSegmenter;
pub use server::{AppState, Radio};
pub use stream::{Stream, StreamBuilder, UriRewriter};
pub use track::{
    FetchedTrack, HttpTrackFetcher, RawSegment, TrackFetcher, TrackInfo, TrackProvider,
    TrackSource,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
