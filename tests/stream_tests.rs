//! Engine scenarios driven through stub track sources
//!
//! The provider and fetcher stubs do no I/O, so the timing-sensitive
//! tests run on tokio's paused clock and advance it explicitly.

use async_trait::async_trait;
use bytes::Bytes;
use radiocast::{
    Error, FetchedTrack, RawSegment, Result, Stream, TrackFetcher, TrackProvider, TrackSource,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::advance;
use uuid::Uuid;

/// Hands out pre-scripted batches, then empty ones
struct ScriptedProvider {
    batches: Mutex<VecDeque<Result<Vec<TrackSource>>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(batches: Vec<Result<Vec<TrackSource>>>) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(batches.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackProvider for ScriptedProvider {
    async fn next_tracks(&self, _station_id: &str) -> Result<Vec<TrackSource>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.batches.lock().unwrap().pop_front() {
            Some(batch) => batch,
            None => Ok(Vec::new()),
        }
    }
}

/// Produces fixed-duration segments named after the source URL
struct StubFetcher {
    segments_per_track: usize,
    segment_duration: f64,
}

#[async_trait]
impl TrackFetcher for StubFetcher {
    async fn fetch_and_segment(&self, source: &TrackSource) -> Result<FetchedTrack> {
        let segments = (0..self.segments_per_track)
            .map(|index| RawSegment {
                uri: format!("{}-{index}.ts", source.url),
                duration: self.segment_duration,
                data: Bytes::from(vec![0x47; 188]),
            })
            .collect();

        Ok(FetchedTrack {
            segments,
            data: Bytes::from_static(b"full-track-audio"),
        })
    }
}

fn batch(prefix: &str, tracks: usize) -> Vec<TrackSource> {
    (0..tracks)
        .map(|k| TrackSource {
            url: format!("{prefix}-t{k}"),
            name: format!("Song {k}"),
            artist: "Artist".into(),
            album: "Album".into(),
        })
        .collect()
}

fn fetcher(segments_per_track: usize, segment_duration: f64) -> Arc<StubFetcher> {
    Arc::new(StubFetcher {
        segments_per_track,
        segment_duration,
    })
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn encoded(stream: &Stream) -> String {
    let bytes = stream.encode_playlist().await;
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn segment_uris(playlist: &str) -> Vec<String> {
    playlist
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn startup_exposes_fixed_window() {
    let provider = ScriptedProvider::new(vec![Ok(batch("b1", 3))]);
    let stream = Stream::builder("S1", provider.clone(), fetcher(3, 10.0)).build();

    let (report_tx, _report_rx) = mpsc::channel(4);
    stream.start(report_tx).await.unwrap();

    assert_eq!(stream.segment_count().await, 9);
    assert!((stream.buffered_seconds().await - 90.0).abs() < 1e-9);

    let playlist = encoded(&stream).await;
    assert!(playlist.starts_with("#EXTM3U"));
    assert!(playlist.contains("#EXT-X-TARGETDURATION:10"));
    assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0"));
    assert_eq!(playlist.matches("#EXTINF:").count(), 6);
    // The six advertised segments span the first two tracks, so exactly
    // one track boundary (the third track's marker sits outside the
    // advertised window until retirement slides it in).
    assert_eq!(playlist.matches("#EXT-X-DISCONTINUITY\n").count(), 1);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn start_queues_the_first_batch_regardless_of_fetch_limit() {
    let provider = ScriptedProvider::new(vec![Ok(batch("b1", 3))]);
    let stream = Stream::builder("S1", provider.clone(), fetcher(3, 10.0))
        .fetch_limit(0.0)
        .build();

    let (report_tx, mut report_rx) = mpsc::channel(4);
    stream.start(report_tx).await.unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(stream.segment_count().await, 9);
    assert_eq!(encoded(&stream).await.matches("#EXTINF:").count(), 6);
    assert!(report_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn retirement_advances_the_window() {
    let provider = ScriptedProvider::new(vec![Ok(batch("b1", 3))]);
    let stream = Stream::builder("S1", provider.clone(), fetcher(3, 10.0))
        .fetch_limit(15.0)
        .build();

    let (report_tx, _report_rx) = mpsc::channel(4);
    stream.start(report_tx).await.unwrap();

    let before = segment_uris(&encoded(&stream).await);

    advance(Duration::from_secs(10)).await;
    settle().await;

    let playlist = encoded(&stream).await;
    assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:1"));

    let after = segment_uris(&playlist);
    assert_eq!(after.len(), 6);
    assert_eq!(after[0], before[1]);
    assert_eq!(stream.segment_count().await, 8);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn low_water_triggers_single_prefetch() {
    let provider = ScriptedProvider::new(vec![Ok(batch("b1", 3)), Ok(batch("b2", 3))]);
    let stream = Stream::builder("S1", provider.clone(), fetcher(3, 10.0))
        .fetch_limit(15.0)
        .build();

    let (report_tx, mut report_rx) = mpsc::channel(4);
    stream.start(report_tx).await.unwrap();

    // Drain 80 of the 90 buffered seconds; the 8th retirement crosses
    // the low-water mark and must refill the window exactly once.
    for _ in 0..8 {
        advance(Duration::from_secs(10)).await;
        settle().await;
    }

    assert_eq!(provider.calls(), 2);
    assert!(stream.segment_count().await >= 6);
    assert!(stream.buffered_seconds().await > 15.0);

    let playlist = encoded(&stream).await;
    assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:8"));
    assert!(report_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn pause_freezes_retirement() {
    let provider = ScriptedProvider::new(vec![Ok(batch("b1", 3))]);
    let stream = Stream::builder("S1", provider.clone(), fetcher(3, 10.0))
        .fetch_limit(15.0)
        .build();

    let (report_tx, _report_rx) = mpsc::channel(4);
    stream.start(report_tx).await.unwrap();

    let before = encoded(&stream).await;
    stream.pause().await.unwrap();

    // Way past several segment durations: nothing may retire.
    advance(Duration::from_secs(60)).await;
    settle().await;
    assert_eq!(encoded(&stream).await, before);

    stream.resume().await.unwrap();

    // The head gets a fresh full timer after resume.
    advance(Duration::from_secs(10)).await;
    settle().await;
    assert!(encoded(&stream).await.contains("#EXT-X-MEDIA-SEQUENCE:1"));
}

#[tokio::test(start_paused = true)]
async fn empty_prefetch_batch_kills_the_stream() {
    let provider = ScriptedProvider::new(vec![Ok(batch("b1", 1))]);
    let stream = Stream::builder("S1", provider.clone(), fetcher(1, 10.0))
        .fetch_limit(15.0)
        .build();

    let (report_tx, mut report_rx) = mpsc::channel(4);
    stream.start(report_tx).await.unwrap();

    // The only segment retires; the prefetch finds no tracks and the
    // retirement worker runs into an empty window.
    advance(Duration::from_secs(10)).await;
    settle().await;

    let reported = report_rx.try_recv().expect("fatal error must be reported");
    assert!(matches!(reported, Error::PlaylistEmpty));

    assert!(matches!(stream.pause().await, Err(Error::StreamNotRunning)));
    assert!(matches!(
        stream.resume().await,
        Err(Error::StreamNotPaused)
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_initial_fetch_leaves_stream_stopped() {
    let provider = ScriptedProvider::new(vec![Err(Error::NoTracksFound), Ok(batch("b1", 2))]);
    let stream = Stream::builder("S1", provider.clone(), fetcher(2, 10.0)).build();

    let (report_tx, mut report_rx) = mpsc::channel(4);
    let err = stream.start(report_tx.clone()).await.unwrap_err();
    assert!(matches!(err, Error::NoTracksFound));
    assert!(report_rx.try_recv().is_err());

    // Still stopped, so a second start may succeed.
    stream.start(report_tx.clone()).await.unwrap();
    assert_eq!(stream.segment_count().await, 4);

    assert!(matches!(
        stream.start(report_tx).await,
        Err(Error::StreamAlreadyStarted)
    ));
}

#[tokio::test(start_paused = true)]
async fn control_operations_require_the_right_state() {
    let provider = ScriptedProvider::new(vec![Ok(batch("b1", 2))]);
    let stream = Stream::builder("S1", provider, fetcher(2, 10.0)).build();

    assert!(matches!(stream.pause().await, Err(Error::StreamNotRunning)));
    assert!(matches!(
        stream.resume().await,
        Err(Error::StreamNotPaused)
    ));

    let (report_tx, _report_rx) = mpsc::channel(4);
    stream.start(report_tx).await.unwrap();

    assert!(matches!(
        stream.resume().await,
        Err(Error::StreamNotPaused)
    ));

    stream.pause().await.unwrap();
    assert!(matches!(stream.pause().await, Err(Error::StreamNotRunning)));
    stream.resume().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rewritten_uris_serve_the_reader_api() {
    let provider = ScriptedProvider::new(vec![Ok(batch("b1", 2))]);
    let stream = Stream::builder("S1", provider, fetcher(2, 10.0))
        .uri_rewriter(|track, index| format!("/stations/jazz/tracks/{track}/segments/{index}.ts"))
        .build();

    let (report_tx, _report_rx) = mpsc::channel(4);
    stream.start(report_tx).await.unwrap();

    let playlist = encoded(&stream).await;
    let uris = segment_uris(&playlist);
    assert_eq!(uris.len(), 4);

    // Track ids are embedded in the rewritten URIs.
    let track: Uuid = uris[0]
        .split('/')
        .nth(4)
        .and_then(|part| part.parse().ok())
        .expect("rewritten uri carries the track id");

    let info = stream.track_info(track).await.unwrap();
    assert_eq!(info.artist, "Artist");
    assert!(info.name.starts_with("Song "));

    assert!(stream.is_track_live(track).await);
    assert_eq!(
        stream.track_data(track).await.unwrap(),
        Bytes::from_static(b"full-track-audio")
    );

    assert_eq!(stream.segment_data(track, 0).await.unwrap().len(), 188);
    assert!(matches!(
        stream.segment_data(track, 7).await,
        Err(Error::SegmentNotFound)
    ));
    assert!(matches!(
        stream.track_info(Uuid::new_v4()).await,
        Err(Error::TrackNotFound)
    ));
    assert!(!stream.is_track_live(Uuid::new_v4()).await);
}

/// Counts concurrent `next_tracks` calls while taking a while to answer
struct SlowProvider {
    calls: AtomicUsize,
    active: AtomicUsize,
    overlapped: AtomicUsize,
}

#[async_trait]
impl TrackProvider for SlowProvider {
    async fn next_tracks(&self, _station_id: &str) -> Result<Vec<TrackSource>> {
        let batch_no = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.fetch_add(1, Ordering::SeqCst);
        }

        tokio::time::sleep(Duration::from_millis(120)).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(batch(&format!("p{batch_no}"), 10))
    }
}

#[tokio::test]
async fn at_most_one_build_in_flight() {
    let provider = Arc::new(SlowProvider {
        calls: AtomicUsize::new(0),
        active: AtomicUsize::new(0),
        overlapped: AtomicUsize::new(0),
    });
    // Short segments and a huge fetch limit: every retirement wants a
    // prefetch, but the fetching flag must keep builds serialized.
    let stream = Stream::builder("S1", provider.clone(), fetcher(1, 0.05))
        .fetch_limit(10_000.0)
        .build();

    let (report_tx, mut report_rx) = mpsc::channel(4);
    stream.start(report_tx).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(provider.calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(provider.overlapped.load(Ordering::SeqCst), 0);
    assert!(report_rx.try_recv().is_err());
}
