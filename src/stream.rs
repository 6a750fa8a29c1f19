//! The per-station stream engine
//!
//! A [`Stream`] keeps an always-fresh sliding-window HLS playlist alive:
//! it fetches tracks ahead of playback, remuxes them into segments, and
//! retires the head segment in wall-clock time. One retirement worker
//! and at most one in-flight playlist build share the window with any
//! number of concurrent readers.
//!
//! Lifecycle: `Stopped` → [`Stream::start`] → `Running` ⇄ (`pause`/
//! `resume`) `Paused`; any fatal error moves the stream to `Killed` and
//! reports it exactly once on the channel handed to `start`. A killed
//! stream cannot be revived; build a new one.

use crate::error::{Error, Result};
use crate::track::{TrackFetcher, TrackProvider, TrackSource};
use crate::window::{Segment, Window, DEFAULT_CAPACITY, DEFAULT_WINDOW_SIZE};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

/// Buffered playable seconds below which the next batch is fetched
/// (about 10 minutes)
pub const DEFAULT_FETCH_LIMIT_SECS: f64 = 600.0;

/// Rewrites a segment URI before it enters the window, so the front-end
/// can route segments under its own path scheme. Must keep URIs unique
/// within the window.
pub type UriRewriter = Arc<dyn Fn(Uuid, usize) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Running,
    Paused,
    Killed,
}

/// A pause or resume request; the worker answers on the enclosed channel
/// once it took the request, so the caller and the worker meet at a
/// defined point.
type Rendezvous = oneshot::Sender<()>;

struct Control {
    state: State,
    pause_tx: Option<mpsc::Sender<Rendezvous>>,
    resume_tx: Option<mpsc::Sender<Rendezvous>>,
    report_tx: Option<mpsc::Sender<Error>>,
}

struct StreamInner {
    id: Uuid,
    station_id: String,
    provider: Arc<dyn TrackProvider>,
    fetcher: Arc<dyn TrackFetcher>,
    rewriter: Option<UriRewriter>,
    fetch_limit: f64,
    window: Window,
    control: Mutex<Control>,
}

/// Handle to one station's stream engine. Clones share the same engine.
#[derive(Clone)]
pub struct Stream(Arc<StreamInner>);

/// Configures and builds a [`Stream`]
pub struct StreamBuilder {
    station_id: String,
    provider: Arc<dyn TrackProvider>,
    fetcher: Arc<dyn TrackFetcher>,
    rewriter: Option<UriRewriter>,
    window_size: usize,
    capacity: usize,
    fetch_limit: f64,
}

impl StreamBuilder {
    /// Advertised window size in segments
    pub fn window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    /// Upper bound on buffered segments
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Low-water mark in buffered seconds
    pub fn fetch_limit(mut self, seconds: f64) -> Self {
        self.fetch_limit = seconds;
        self
    }

    /// Install a segment URI rewriter
    pub fn uri_rewriter(
        mut self,
        rewriter: impl Fn(Uuid, usize) -> String + Send + Sync + 'static,
    ) -> Self {
        self.rewriter = Some(Arc::new(rewriter));
        self
    }

    pub fn build(self) -> Stream {
        Stream(Arc::new(StreamInner {
            id: Uuid::new_v4(),
            station_id: self.station_id,
            provider: self.provider,
            fetcher: self.fetcher,
            rewriter: self.rewriter,
            fetch_limit: self.fetch_limit,
            window: Window::new(self.window_size, self.capacity),
            control: Mutex::new(Control {
                state: State::Stopped,
                pause_tx: None,
                resume_tx: None,
                report_tx: None,
            }),
        }))
    }
}

impl Stream {
    /// Start building a stream for one station
    pub fn builder(
        station_id: impl Into<String>,
        provider: Arc<dyn TrackProvider>,
        fetcher: Arc<dyn TrackFetcher>,
    ) -> StreamBuilder {
        StreamBuilder {
            station_id: station_id.into(),
            provider,
            fetcher,
            rewriter: None,
            window_size: DEFAULT_WINDOW_SIZE,
            capacity: DEFAULT_CAPACITY,
            fetch_limit: DEFAULT_FETCH_LIMIT_SECS,
        }
    }

    /// Engine instance id (one per built stream)
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    /// Station this stream plays
    pub fn station_id(&self) -> &str {
        &self.0.station_id
    }

    /// Queue the first batch synchronously, then spawn the retirement
    /// worker. Fatal errors are delivered on `report` exactly once.
    ///
    /// Fails with [`Error::StreamAlreadyStarted`] unless the stream is
    /// stopped; a failed initial fetch leaves it stopped.
    pub async fn start(&self, report: mpsc::Sender<Error>) -> Result<()> {
        let mut control = self.0.control.lock().await;
        if control.state != State::Stopped {
            return Err(Error::StreamAlreadyStarted);
        }

        info!(stream = %self.0.id, station = %self.0.station_id, "starting stream");

        self.queue_next_playlist().await?;

        let (pause_tx, pause_rx) = mpsc::channel(1);
        let (resume_tx, resume_rx) = mpsc::channel(1);
        control.pause_tx = Some(pause_tx);
        control.resume_tx = Some(resume_tx);
        control.report_tx = Some(report);
        control.state = State::Running;
        drop(control);

        let stream = self.clone();
        tokio::spawn(async move { stream.retirement_loop(pause_rx, resume_rx).await });

        info!(stream = %self.0.id, "stream started");
        Ok(())
    }

    /// Freeze retirement. Returns once the worker has taken the request:
    /// from then until [`Stream::resume`], no segment retires.
    pub async fn pause(&self) -> Result<()> {
        let pause_tx = {
            let control = self.0.control.lock().await;
            if control.state != State::Running {
                return Err(Error::StreamNotRunning);
            }
            control.pause_tx.clone().ok_or(Error::StreamNotRunning)?
        };

        rendezvous(&pause_tx)
            .await
            .map_err(|_| Error::StreamNotRunning)?;

        let mut control = self.0.control.lock().await;
        if control.state != State::Running {
            return Err(Error::StreamNotRunning);
        }
        control.state = State::Paused;

        info!(stream = %self.0.id, "stream paused");
        Ok(())
    }

    /// Resume a paused stream; the head segment gets a fresh full timer.
    pub async fn resume(&self) -> Result<()> {
        let resume_tx = {
            let control = self.0.control.lock().await;
            if control.state != State::Paused {
                return Err(Error::StreamNotPaused);
            }
            control.resume_tx.clone().ok_or(Error::StreamNotPaused)?
        };

        rendezvous(&resume_tx)
            .await
            .map_err(|_| Error::StreamNotPaused)?;

        let mut control = self.0.control.lock().await;
        if control.state != State::Paused {
            return Err(Error::StreamNotPaused);
        }
        control.state = State::Running;

        info!(stream = %self.0.id, "stream resumed");
        Ok(())
    }

    /// Snapshot of the advertised playlist. The buffer is detached from
    /// the window, so writing it to a slow socket never blocks the
    /// engine.
    pub async fn encode_playlist(&self) -> Bytes {
        self.0.window.encode_playlist().await
    }

    /// MPEG-TS bytes of one segment
    pub async fn segment_data(&self, track: Uuid, index: usize) -> Result<Bytes> {
        self.0.window.segment_data(track, index).await
    }

    /// Metadata of a track still in the window
    pub async fn track_info(&self, track: Uuid) -> Result<crate::track::TrackInfo> {
        self.0.window.track_info(track).await
    }

    /// Full source audio of a track still in the window
    pub async fn track_data(&self, track: Uuid) -> Result<Bytes> {
        self.0.window.track_data(track).await
    }

    /// Whether any segment of the track is still in the window
    pub async fn is_track_live(&self, track: Uuid) -> bool {
        self.0.window.is_track_live(track).await
    }

    /// Seconds of audio currently buffered
    pub async fn buffered_seconds(&self) -> f64 {
        self.0.window.buffered().await
    }

    /// Number of segments currently buffered
    pub async fn segment_count(&self) -> usize {
        self.0.window.segment_count().await
    }

    /// Fetch the next batch of tracks and append them to the window.
    /// At most one build runs per stream; re-entry is a no-op.
    async fn queue_next_playlist(&self) -> Result<()> {
        if !self.0.window.begin_fetch().await {
            return Ok(());
        }

        let result = self.build_next_playlist().await;
        self.0.window.end_fetch().await;
        result
    }

    async fn build_next_playlist(&self) -> Result<()> {
        info!(stream = %self.0.id, station = %self.0.station_id, "queueing next playlist");

        let sources = self
            .0
            .provider
            .next_tracks(&self.0.station_id)
            .await?;

        let mut tasks = JoinSet::new();
        for source in sources {
            let stream = self.clone();
            tasks.spawn(async move { stream.fetch_and_append(source).await });
        }

        // All tracks of the batch complete before we return; the last
        // error observed wins.
        let mut last_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => last_error = Some(err),
                Err(err) => last_error = Some(Error::other(format!("track task failed: {err}"))),
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => {
                info!(stream = %self.0.id, "playlist queued");
                Ok(())
            }
        }
    }

    async fn fetch_and_append(&self, source: TrackSource) -> Result<()> {
        let fetched = self.0.fetcher.fetch_and_segment(&source).await?;

        let track_id = Uuid::new_v4();
        let mut segments = Vec::with_capacity(fetched.segments.len());
        for (index, raw) in fetched.segments.into_iter().enumerate() {
            let uri = match &self.0.rewriter {
                Some(rewrite) => rewrite(track_id, index),
                None => raw.uri,
            };
            segments.push(Segment {
                uri,
                duration: raw.duration,
                index,
                track: track_id,
                data: raw.data,
                discontinuity: false,
            });
        }

        debug!(stream = %self.0.id, track = %track_id, song = %source.name, "track fetched and split");

        self.0
            .window
            .append_track(track_id, (&source).into(), fetched.data, segments)
            .await?;

        debug!(stream = %self.0.id, track = %track_id, "track appended to window");
        Ok(())
    }

    /// The single long-running retirement worker for this stream.
    async fn retirement_loop(
        self,
        mut pause_rx: mpsc::Receiver<Rendezvous>,
        mut resume_rx: mpsc::Receiver<Rendezvous>,
    ) {
        let (fetch_failed_tx, mut fetch_failed_rx) = mpsc::channel::<()>(1);

        loop {
            let head = match self.0.window.head().await {
                Some(segment) => segment,
                None => {
                    self.fatal(Error::PlaylistEmpty).await;
                    return;
                }
            };

            tokio::select! {
                biased;

                request = pause_rx.recv() => {
                    let Some(ack) = request else { return };
                    let _ = ack.send(());
                    trace!(stream = %self.0.id, "retirement frozen");

                    match resume_rx.recv().await {
                        Some(ack) => {
                            let _ = ack.send(());
                            trace!(stream = %self.0.id, "retirement thawed");
                        }
                        None => return,
                    }

                    // Nothing retired while paused; re-time the same head.
                    continue;
                }

                _ = fetch_failed_rx.recv() => return,

                _ = tokio::time::sleep(Duration::from_secs_f64(head.duration)) => {}
            }

            match self.0.window.retire_head().await {
                Ok(segment) => {
                    trace!(stream = %self.0.id, uri = %segment.uri, "segment retired");
                }
                Err(err) => {
                    self.fatal(err).await;
                    return;
                }
            }

            if self.0.window.should_fetch(self.0.fetch_limit).await {
                let buffered = self.0.window.buffered().await;
                debug!(stream = %self.0.id, buffered, "buffer at low-water mark, prefetching");

                let stream = self.clone();
                let failed = fetch_failed_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = stream.queue_next_playlist().await {
                        stream.fatal(err).await;
                        let _ = failed.send(()).await;
                    }
                });
            }
        }
    }

    /// Kill the stream and report the error. Only the first fatal error
    /// reaches the report channel.
    async fn fatal(&self, err: Error) {
        let report = {
            let mut control = self.0.control.lock().await;
            control.state = State::Killed;
            control.report_tx.take()
        };

        error!(stream = %self.0.id, %err, "stream killed");
        if let Some(report) = report {
            let _ = report.send(err).await;
        }
    }
}

async fn rendezvous(tx: &mpsc::Sender<Rendezvous>) -> std::result::Result<(), ()> {
    let (ack_tx, ack_rx) = oneshot::channel();
    tx.send(ack_tx).await.map_err(|_| ())?;
    ack_rx.await.map_err(|_| ())
}

#[async_trait::async_trait]
impl crate::pauser::PauseResume for Stream {
    async fn pause(&self) -> Result<()> {
        Stream::pause(self).await
    }

    async fn resume(&self) -> Result<()> {
        Stream::resume(self).await
    }
}
