//! ffmpeg-based audio segmenter
//!
//! Remuxes one track into fixed-duration MPEG-TS segments by piping the
//! audio into an external ffmpeg process (`-c copy -f segment`), then
//! parses the segment list ffmpeg wrote and loads the segment files back
//! into memory. Scratch files are deleted once loaded.

use crate::error::{Error, Result};
use crate::track::RawSegment;
use bytes::Bytes;
use m3u8_rs::Playlist;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default segmenter command name
pub const DEFAULT_COMMAND: &str = "ffmpeg";

/// Target segment duration in seconds
pub const DEFAULT_SEGMENT_SECONDS: u32 = 10;

/// Splits audio tracks into MPEG-TS segments with an ffmpeg subprocess
#[derive(Debug, Clone)]
pub struct FfmpegSegmenter {
    command: String,
    dest: PathBuf,
    segment_seconds: u32,
    keep_playlist: bool,
}

impl Default for FfmpegSegmenter {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            dest: std::env::temp_dir(),
            segment_seconds: DEFAULT_SEGMENT_SECONDS,
            keep_playlist: false,
        }
    }
}

impl FfmpegSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different command name (e.g. an absolute ffmpeg path)
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Directory for scratch playlist and segment files
    pub fn with_dest(mut self, dest: impl Into<PathBuf>) -> Self {
        self.dest = dest.into();
        self
    }

    /// Keep the generated segment list on disk after loading
    pub fn keep_playlist(mut self, keep: bool) -> Self {
        self.keep_playlist = keep;
        self
    }

    /// Pre-flight check that the configured command is on `PATH`
    pub fn installed(&self) -> bool {
        std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("command -v {}", self.command))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Split one track into ordered MPEG-TS segments
    pub async fn split(&self, audio: Bytes) -> Result<Vec<RawSegment>> {
        let id = Uuid::new_v4();
        let playlist_path = self.dest.join(format!("{id}.m3u8"));
        let segment_pattern = self.dest.join(format!("{id}-%d.ts"));

        debug!(
            command = %self.command,
            playlist = %playlist_path.display(),
            "segmenting track"
        );

        let mut child = Command::new(&self.command)
            .arg("-i")
            .arg("-")
            .arg("-c")
            .arg("copy")
            .arg("-f")
            .arg("segment")
            .arg("-segment_list")
            .arg(&playlist_path)
            .arg("-segment_time")
            .arg(self.segment_seconds.to_string())
            .arg("-segment_list_flags")
            .arg("+live")
            .arg(&segment_pattern)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::other("segmenter stdin unavailable"))?;

        // Feed stdin concurrently with the wait: ffmpeg writes segment
        // files while it is still consuming input.
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(&audio).await;
            let _ = stdin.shutdown().await;
        });

        let status = child.wait().await?;
        let _ = writer.await;

        if !status.success() {
            return Err(Error::SegmenterFailed(format!(
                "{} exited with {status}",
                self.command
            )));
        }

        let listing = tokio::fs::read(&playlist_path).await?;
        if !self.keep_playlist {
            if let Err(err) = tokio::fs::remove_file(&playlist_path).await {
                warn!(path = %playlist_path.display(), %err, "failed to remove segment list");
            }
        }

        let playlist = parse_segment_list(&listing)?;

        let mut segments = Vec::with_capacity(playlist.segments.len());
        for entry in &playlist.segments {
            let path = self.resolve(&entry.uri);
            let data = tokio::fs::read(&path).await?;
            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), %err, "failed to remove segment file");
            }

            segments.push(RawSegment {
                uri: file_name(&entry.uri),
                duration: f64::from(entry.duration),
                data: Bytes::from(data),
            });
        }

        if segments.is_empty() {
            return Err(Error::SegmenterFailed("segment list is empty".into()));
        }

        debug!(count = segments.len(), "track segmented");
        Ok(segments)
    }

    fn resolve(&self, uri: &str) -> PathBuf {
        let path = Path::new(uri);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dest.join(path)
        }
    }
}

/// Parse the segment list ffmpeg generated.
///
/// ffmpeg is expected to emit a media playlist; anything else means the
/// invocation was wrong.
pub(crate) fn parse_segment_list(data: &[u8]) -> Result<m3u8_rs::MediaPlaylist> {
    match m3u8_rs::parse_playlist_res(data) {
        Ok(Playlist::MediaPlaylist(playlist)) => Ok(playlist),
        Ok(Playlist::MasterPlaylist(_)) => Err(Error::PlaylistTypeMismatch),
        Err(err) => Err(Error::SegmenterFailed(format!(
            "unparsable segment list: {err:?}"
        ))),
    }
}

fn file_name(uri: &str) -> String {
    Path::new(uri)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA_LIST: &str = "#EXTM3U\n\
        #EXT-X-VERSION:3\n\
        #EXT-X-TARGETDURATION:10\n\
        #EXT-X-MEDIA-SEQUENCE:0\n\
        #EXTINF:10.005333,\n\
        /tmp/abc-0.ts\n\
        #EXTINF:9.984000,\n\
        /tmp/abc-1.ts\n\
        #EXT-X-ENDLIST\n";

    const MASTER_LIST: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=128000\n\
        low/playlist.m3u8\n";

    #[test]
    fn parses_media_list() {
        let playlist = parse_segment_list(MEDIA_LIST.as_bytes()).unwrap();
        assert_eq!(playlist.segments.len(), 2);
        assert_eq!(playlist.segments[0].uri, "/tmp/abc-0.ts");
        assert!((playlist.segments[0].duration - 10.005333).abs() < 1e-3);
    }

    #[test]
    fn rejects_master_list() {
        let err = parse_segment_list(MASTER_LIST.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::PlaylistTypeMismatch));
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_segment_list(b"not a playlist").unwrap_err();
        assert!(matches!(err, Error::SegmenterFailed(_)));
    }

    #[test]
    fn file_name_strips_directories() {
        assert_eq!(file_name("/tmp/scratch/abc-3.ts"), "abc-3.ts");
        assert_eq!(file_name("abc-3.ts"), "abc-3.ts");
    }

    #[test]
    fn command_check_does_not_panic() {
        let segmenter = FfmpegSegmenter::new().with_command("definitely-not-a-real-command");
        assert!(!segmenter.installed());
    }
}
