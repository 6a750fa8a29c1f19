//! Data models for the track-delivery API responses

use serde::Deserialize;
use std::collections::HashMap;

/// Application-level error code the upstream uses for an expired or
/// invalid auth token.
pub(crate) const INVALID_TOKEN_CODE: i64 = 1001;

/// Response envelope wrapping every upstream payload.
///
/// Successful calls carry `stat: "ok"` and a `result`; failures carry
/// `stat: "fail"` plus an application error code and message.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct Envelope<T> {
    pub stat: String,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<T>,
}

/// Result of `/auth/login`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub auth_token: String,
    #[serde(default)]
    pub can_listen: bool,
}

/// Result of station creation / lookup
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationResult {
    pub station_id: String,
    #[serde(default)]
    pub station_name: Option<String>,
}

/// One batch of upcoming tracks for a station
#[derive(Debug, Clone, Deserialize)]
pub struct StationPlaylist {
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
}

/// One upcoming track, with its audio URL per quality level
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    #[serde(default)]
    pub song_name: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub album_name: String,
    #[serde(default)]
    pub audio_url_map: HashMap<String, AudioUrl>,
}

/// Audio location for one quality level
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioUrl {
    pub audio_url: String,
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}
