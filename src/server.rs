//! HTTP front-end
//!
//! Routes listener requests to the stream engines: the media playlist,
//! segment bytes, track metadata and full-track downloads. Segment
//! reads count as listener activity and reset the station's idle
//! pauser.

use crate::error::Error;
use crate::pauser::PauserHandle;
use crate::stream::Stream;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Playlist content type
const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Segment content type (MPEG-TS)
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Track download content type
const TRACK_CONTENT_TYPE: &str = "audio/mp4";

/// One exposed station: a started stream and its idle pauser
pub struct Radio {
    pub stream: Stream,
    pub pauser: PauserHandle,
}

/// Shared state behind the router
pub struct AppState {
    radios: HashMap<String, Radio>,
    default_station: Option<String>,
}

impl AppState {
    pub fn new(radios: HashMap<String, Radio>, default_station: Option<String>) -> Self {
        Self {
            radios,
            default_station,
        }
    }

    fn radio(&self, name: &str) -> Result<&Radio, StatusCode> {
        self.radios.get(name).ok_or(StatusCode::NOT_FOUND)
    }
}

/// Build the front-end router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/stations", get(stations_list))
        .route("/stations/{name}", get(station_redirect))
        .route("/stations/{name}/playlist.m3u8", get(playlist))
        .route("/stations/{name}/tracks/{id}/info", get(track_info))
        .route("/stations/{name}/tracks/{id}/download", get(track_download))
        .route(
            "/stations/{name}/tracks/{id}/downloadable",
            get(track_downloadable),
        )
        .route(
            "/stations/{name}/tracks/{id}/segments/{index}",
            get(segment),
        )
        .with_state(state)
}

fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::SegmentNotFound | Error::TrackNotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse_track_id(id: &str) -> Result<Uuid, StatusCode> {
    Uuid::parse_str(id).map_err(|_| StatusCode::NOT_FOUND)
}

async fn root(State(state): State<Arc<AppState>>) -> Result<Redirect, StatusCode> {
    let name = state.default_station.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    Ok(Redirect::to(&format!("/stations/{name}/playlist.m3u8")))
}

async fn stations_list(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut names: Vec<&String> = state.radios.keys().collect();
    names.sort();

    let mut stations = Vec::with_capacity(names.len());
    for name in names {
        let radio = &state.radios[name];
        let buffered_seconds = radio.stream.buffered_seconds().await;
        let segments = radio.stream.segment_count().await;
        stations.push(json!({
            "name": name,
            "buffered_seconds": buffered_seconds,
            "segments": segments,
        }));
    }

    Json(json!({
        "stations": stations,
        "default": state.default_station,
    }))
}

async fn station_redirect(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Redirect, StatusCode> {
    state.radio(&name)?;
    Ok(Redirect::to(&format!("/stations/{name}/playlist.m3u8")))
}

async fn playlist(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, StatusCode> {
    let radio = state.radio(&name)?;
    let body = radio.stream.encode_playlist().await;
    Ok(([(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)], body).into_response())
}

async fn segment(
    State(state): State<Arc<AppState>>,
    Path((name, id, index)): Path<(String, String, String)>,
) -> Result<Response, StatusCode> {
    let radio = state.radio(&name)?;
    let track = parse_track_id(&id)?;
    let index = index
        .strip_suffix(".ts")
        .unwrap_or(&index)
        .parse::<usize>()
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let body = radio
        .stream
        .segment_data(track, index)
        .await
        .map_err(|err| error_status(&err))?;

    radio.pauser.reset();
    Ok(([(header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE)], body).into_response())
}

async fn track_info(
    State(state): State<Arc<AppState>>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Response, StatusCode> {
    let radio = state.radio(&name)?;
    let track = parse_track_id(&id)?;
    let info = radio
        .stream
        .track_info(track)
        .await
        .map_err(|err| error_status(&err))?;

    Ok(Json(info).into_response())
}

async fn track_download(
    State(state): State<Arc<AppState>>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Response, StatusCode> {
    let radio = state.radio(&name)?;
    let track = parse_track_id(&id)?;

    let info = radio
        .stream
        .track_info(track)
        .await
        .map_err(|err| error_status(&err))?;
    let body = radio
        .stream
        .track_data(track)
        .await
        .map_err(|err| error_status(&err))?;

    let disposition = format!("attachment; filename=\"{}.m4a\"", sanitize_filename(&info.name));
    Ok((
        [
            (header::CONTENT_TYPE, TRACK_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn track_downloadable(
    State(state): State<Arc<AppState>>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<bool>, StatusCode> {
    let radio = state.radio(&name)?;
    let track = parse_track_id(&id)?;
    Ok(Json(radio.stream.is_track_live(track).await))
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "track".to_string()
    } else {
        trimmed.to_string()
    }
}
