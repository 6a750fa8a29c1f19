//! Error types shared across the crate

/// Result type alias for radiocast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the stream engine, the upstream client and the
/// segmenter.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `start()` was called on a stream that is not stopped
    #[error("stream cannot be started")]
    StreamAlreadyStarted,

    /// `pause()` was called on a stream that is not running
    #[error("stream not running")]
    StreamNotRunning,

    /// `resume()` was called on a stream that is not paused
    #[error("stream not paused")]
    StreamNotPaused,

    /// The retirement worker found an empty segment window (fatal)
    #[error("the playlist is empty")]
    PlaylistEmpty,

    /// Appending a track would exceed the window capacity (fatal)
    #[error("the segment window is full")]
    WindowFull,

    /// No segment matches the requested track and index
    #[error("segment not found")]
    SegmentNotFound,

    /// No track matches the requested id
    #[error("track not found")]
    TrackNotFound,

    /// The upstream batch contained no playable tracks
    #[error("no tracks found")]
    NoTracksFound,

    /// The upstream account is not allowed to stream
    #[error("account cannot listen to music")]
    CannotListen,

    /// The upstream responded with a non-success HTTP status
    #[error("upstream responded with status {0}")]
    UpstreamStatus(u16),

    /// The upstream rejected the auth token (retried internally, never
    /// surfaced by the client)
    #[error("upstream auth token expired")]
    UpstreamAuthExpired,

    /// Any other application-level error reported by the upstream
    #[error("upstream error {code}: {message}")]
    Api { code: i64, message: String },

    /// The segmenter subprocess failed or produced unusable output
    #[error("segmenter failed: {0}")]
    SegmenterFailed(String),

    /// The segmenter emitted a master playlist instead of a media playlist
    #[error("segmenter produced a master playlist")]
    PlaylistTypeMismatch,

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
