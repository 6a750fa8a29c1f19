//! The sliding segment window
//!
//! Holds the live playlist state for one stream: the play-order queue of
//! segments, the per-URI and per-track indices, the buffered-duration
//! accumulator and the media-sequence counter. The playlist builder
//! appends at the tail, the retirement worker pops at the head, readers
//! snapshot; all three go through the one `RwLock` in here.

use crate::error::{Error, Result};
use crate::track::TrackInfo;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Number of segments advertised to clients at once (about 60 s)
pub const DEFAULT_WINDOW_SIZE: usize = 6;

/// Upper bound on buffered segments
pub const DEFAULT_CAPACITY: usize = 256;

/// One playable segment, immutable once appended
#[derive(Debug)]
pub(crate) struct Segment {
    pub uri: String,
    pub duration: f64,
    pub index: usize,
    pub track: Uuid,
    pub data: Bytes,
    pub discontinuity: bool,
}

struct TrackEntry {
    info: TrackInfo,
    data: Bytes,
    segments: Vec<Arc<Segment>>,
    live: usize,
}

#[derive(Default)]
struct WindowState {
    queue: VecDeque<Arc<Segment>>,
    by_uri: HashMap<String, Arc<Segment>>,
    tracks: HashMap<Uuid, TrackEntry>,
    buffered: f64,
    media_sequence: u64,
    target_duration: u64,
    fetching: bool,
}

pub(crate) struct Window {
    window_size: usize,
    capacity: usize,
    state: RwLock<WindowState>,
}

impl Window {
    pub fn new(window_size: usize, capacity: usize) -> Self {
        Self {
            window_size,
            capacity,
            state: RwLock::new(WindowState {
                target_duration: 1,
                ..WindowState::default()
            }),
        }
    }

    /// Append a whole track atomically.
    ///
    /// The track's first segment gets the discontinuity marker when the
    /// window already holds audio. URIs must be unique across the
    /// window; a collision is a programmer error in the URI rewriter and
    /// panics.
    pub async fn append_track(
        &self,
        id: Uuid,
        info: TrackInfo,
        data: Bytes,
        segments: Vec<Segment>,
    ) -> Result<()> {
        if segments.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        if state.queue.len() + segments.len() > self.capacity {
            return Err(Error::WindowFull);
        }

        let discontinuity = !state.queue.is_empty();
        let mut stored = Vec::with_capacity(segments.len());
        for (position, mut segment) in segments.into_iter().enumerate() {
            debug_assert_eq!(segment.index, position, "segments must arrive in play order");
            if position == 0 {
                segment.discontinuity = discontinuity;
            }
            assert!(
                !state.by_uri.contains_key(&segment.uri),
                "segment uri collision in window: {}",
                segment.uri
            );

            state.buffered += segment.duration;
            let ceiled = segment.duration.ceil() as u64;
            if ceiled > state.target_duration {
                state.target_duration = ceiled;
            }

            let segment = Arc::new(segment);
            state.by_uri.insert(segment.uri.clone(), segment.clone());
            state.queue.push_back(segment.clone());
            stored.push(segment);
        }

        let live = stored.len();
        state.tracks.insert(
            id,
            TrackEntry {
                info,
                data,
                segments: stored,
                live,
            },
        );
        Ok(())
    }

    /// Current head segment, if any
    pub async fn head(&self) -> Option<Arc<Segment>> {
        self.state.read().await.queue.front().cloned()
    }

    /// Drop the head segment: advance the media sequence, release its
    /// bytes, and evict its track once no segment of it remains.
    pub async fn retire_head(&self) -> Result<Arc<Segment>> {
        let mut state = self.state.write().await;
        let segment = state.queue.pop_front().ok_or(Error::PlaylistEmpty)?;

        state.media_sequence += 1;
        state.buffered -= segment.duration;
        if state.queue.is_empty() {
            state.buffered = 0.0;
        }
        state.by_uri.remove(&segment.uri);

        let evict = match state.tracks.get_mut(&segment.track) {
            Some(entry) => {
                entry.live -= 1;
                entry.live == 0
            }
            None => false,
        };
        if evict {
            state.tracks.remove(&segment.track);
        }

        Ok(segment)
    }

    /// Encode the advertised window as an HLS media playlist.
    ///
    /// The buffer is built while the read lock is held; callers write it
    /// to their (possibly slow) socket after this returns, so retirement
    /// never stalls behind a client.
    pub async fn encode_playlist(&self) -> Bytes {
        use std::fmt::Write as _;

        let state = self.state.read().await;

        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:3\n");
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", state.target_duration);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", state.media_sequence);

        for segment in state.queue.iter().take(self.window_size) {
            if segment.discontinuity {
                out.push_str("#EXT-X-DISCONTINUITY\n");
            }
            let _ = writeln!(out, "#EXTINF:{:.3},", segment.duration);
            let _ = writeln!(out, "{}", segment.uri);
        }

        Bytes::from(out)
    }

    /// Segment bytes by track and index. The returned `Bytes` stays
    /// valid even if the segment retires right after the lookup.
    pub async fn segment_data(&self, track: Uuid, index: usize) -> Result<Bytes> {
        let state = self.state.read().await;
        let entry = state.tracks.get(&track).ok_or(Error::SegmentNotFound)?;
        let segment = entry.segments.get(index).ok_or(Error::SegmentNotFound)?;
        Ok(segment.data.clone())
    }

    pub async fn track_info(&self, track: Uuid) -> Result<TrackInfo> {
        let state = self.state.read().await;
        let entry = state.tracks.get(&track).ok_or(Error::TrackNotFound)?;
        Ok(entry.info.clone())
    }

    pub async fn track_data(&self, track: Uuid) -> Result<Bytes> {
        let state = self.state.read().await;
        let entry = state.tracks.get(&track).ok_or(Error::TrackNotFound)?;
        Ok(entry.data.clone())
    }

    pub async fn is_track_live(&self, track: Uuid) -> bool {
        self.state.read().await.tracks.contains_key(&track)
    }

    pub async fn buffered(&self) -> f64 {
        self.state.read().await.buffered
    }

    pub async fn segment_count(&self) -> usize {
        self.state.read().await.queue.len()
    }

    /// Acquire the build flag. Returns false when a build is already in
    /// flight.
    pub async fn begin_fetch(&self) -> bool {
        let mut state = self.state.write().await;
        if state.fetching {
            return false;
        }
        state.fetching = true;
        true
    }

    pub async fn end_fetch(&self) {
        self.state.write().await.fetching = false;
    }

    /// Low-water predicate: buffered playable time at or below the limit
    /// and no build in flight.
    pub async fn should_fetch(&self, limit: f64) -> bool {
        let state = self.state.read().await;
        state.buffered <= limit && !state.fetching
    }
}
