//! Low-level REST access to the track-delivery API
//!
//! This layer speaks the wire format only: the response envelope, the
//! auth-token header and the invalid-token sentinel. Re-authentication
//! policy lives one level up, in [`crate::client`].

use crate::error::{Error, Result};
use crate::models::{Envelope, LoginResult, StationPlaylist, StationResult, INVALID_TOKEN_CODE};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default timeout for API requests
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = concat!("radiocast/", env!("CARGO_PKG_VERSION"));

/// Header carrying the session token
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Low-level client for the track-delivery API
pub struct StationApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl StationApi {
    /// Create a new API client against the given base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            auth_token: None,
        })
    }

    /// Whether a session token is currently held
    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    /// Authenticate and store the session token.
    ///
    /// Fails with [`Error::CannotListen`] when the account exists but is
    /// not allowed to stream.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<LoginResult> {
        debug!(username, "logging in to upstream");

        let body = json!({ "username": username, "password": password });
        let result: LoginResult = self.post("/auth/login", &body).await?;

        if !result.can_listen {
            return Err(Error::CannotListen);
        }

        self.auth_token = Some(result.auth_token.clone());
        Ok(result)
    }

    /// Fetch the next batch of tracks for a station
    pub async fn station_playlist(&self, station_id: &str) -> Result<StationPlaylist> {
        self.get(&format!("/stations/{station_id}/playlist")).await
    }

    /// Create (or look up) a station from a music token
    pub async fn create_station(&self, music_token: &str) -> Result<StationResult> {
        let body = json!({ "musicToken": music_token });
        self.post("/stations", &body).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!(%url, "GET upstream");
        let request = self.authorized(self.client.get(url));
        self.handle_response(request.send().await?).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!(%url, "POST upstream");
        let request = self.authorized(self.client.post(url)).json(body);
        self.handle_response(request.send().await?).await
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}{}", self.base_url, path))?)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(AUTH_TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "upstream returned an error status");
            return Err(Error::UpstreamStatus(status.as_u16()));
        }

        let envelope: Envelope<T> = response.json().await?;
        if envelope.stat != "ok" {
            let code = envelope.code.unwrap_or_default();
            let message = envelope.message.unwrap_or_default();
            if code == INVALID_TOKEN_CODE {
                return Err(Error::UpstreamAuthExpired);
            }
            warn!(code, %message, "upstream call failed");
            return Err(Error::Api { code, message });
        }

        envelope
            .result
            .ok_or_else(|| Error::other("upstream response is missing its result"))
    }
}
