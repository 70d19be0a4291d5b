//! Spotify as the playlist sink.
//!
//! Modifying a playlist needs a user token, so the first run goes through the OAuth
//! authorization-code flow: the user opens [`SpotifyAuth::authorize_url`], logs in, and hands the
//! URL they were redirected to back to [`SpotifyAuth::authorize`]. The resulting token is cached
//! as JSON and refreshed whenever it expires.

use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SpotifyConfig;
use crate::error::SinkError;
use crate::sink::{ItemHandle, PlaylistSink};
use crate::track::Track;

pub const ACCOUNTS_URL: &str = "https://accounts.spotify.com";
pub const API_URL: &str = "https://api.spotify.com/v1";
pub const SCOPES: &str = "playlist-modify-private playlist-modify-public";

// refresh a little before the token actually expires
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Access and refresh token as stored in the token cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() + EXPIRY_MARGIN_SECS >= self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: Page,
}

#[derive(Deserialize)]
struct Page {
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    uri: String,
}

/// OAuth handling for the Spotify accounts service.
#[derive(Clone)]
pub struct SpotifyAuth {
    client: reqwest::Client,
    accounts_url: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    cache_path: PathBuf,
}

impl Debug for SpotifyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyAuth")
            .field("accounts_url", &self.accounts_url)
            .field("client_id", &self.client_id)
            .field("redirect_url", &self.redirect_url)
            .field("cache_path", &self.cache_path)
            .finish_non_exhaustive()
    }
}

impl SpotifyAuth {
    pub fn new<P: Into<PathBuf>>(
        client: reqwest::Client,
        config: &SpotifyConfig,
        cache_path: P,
    ) -> Self {
        Self {
            client,
            accounts_url: ACCOUNTS_URL.to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            cache_path: cache_path.into(),
        }
    }

    pub fn with_accounts_url<S: Into<String>>(mut self, accounts_url: S) -> Self {
        self.accounts_url = accounts_url.into();
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// The page the user has to visit to grant access.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}/authorize?client_id={}&response_type=code&redirect_uri={}&scope={}",
            self.accounts_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode(SCOPES),
        )
    }

    /// Reads the cached token, if any.
    pub async fn cached_token(&self) -> Option<Token> {
        let contents = tokio::fs::read_to_string(&self.cache_path).await.ok()?;
        match serde_json::from_str(&contents) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, path = %self.cache_path.display(), "ignoring corrupt token cache");
                None
            }
        }
    }

    async fn store(&self, token: &Token) {
        let result = match serde_json::to_string_pretty(token) {
            Ok(contents) => tokio::fs::write(&self.cache_path, contents).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(error = %e, path = %self.cache_path.display(), "failed to write token cache");
        }
    }

    /// Exchanges the authorization code contained in `redirected_url` for a token and caches it.
    pub async fn authorize(&self, redirected_url: &str) -> Result<Token, SinkError> {
        let code = code_from_redirect(redirected_url)?;
        let token = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
            ])
            .await?;
        let Some(refresh_token) = token.refresh_token else {
            return Err(SinkError::InvalidResponse(
                "token response without refresh token".to_string(),
            ));
        };
        let token = Token {
            access_token: token.access_token,
            refresh_token,
            expires_at: Utc::now().timestamp() + token.expires_in,
        };
        self.store(&token).await;
        info!("authorized with Spotify");
        Ok(token)
    }

    /// Gets a new access token. Spotify may or may not rotate the refresh token.
    pub async fn refresh(&self, token: &Token) -> Result<Token, SinkError> {
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", token.refresh_token.as_str()),
            ])
            .await?;
        let token = Token {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .unwrap_or_else(|| token.refresh_token.clone()),
            expires_at: Utc::now().timestamp() + response.expires_in,
        };
        self.store(&token).await;
        debug!("refreshed Spotify token");
        Ok(token)
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, SinkError> {
        let response = self
            .client
            .post(format!("{}/api/token", self.accounts_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Unauthorized(format!("HTTP {status}: {body}")));
        }
        Ok(response.json().await?)
    }
}

/// Extracts the `code` query parameter from the URL the user was redirected to.
pub fn code_from_redirect(redirected_url: &str) -> Result<String, SinkError> {
    let url = Url::parse(redirected_url.trim())
        .map_err(|e| SinkError::Unauthorized(format!("invalid redirect URL: {e}")))?;
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => return Err(SinkError::Unauthorized(value.into_owned())),
            _ => {}
        }
    }
    code.ok_or_else(|| SinkError::Unauthorized("redirect URL contains no code".to_string()))
}

/// Spotify Web API client acting as the playlist sink.
pub struct Spotify {
    client: reqwest::Client,
    api_url: String,
    auth: SpotifyAuth,
    token: Mutex<Token>,
}

impl Debug for Spotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spotify")
            .field("api_url", &self.api_url)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl Spotify {
    pub fn new(client: reqwest::Client, auth: SpotifyAuth, token: Token) -> Self {
        Self {
            client,
            api_url: API_URL.to_string(),
            auth,
            token: Mutex::new(token),
        }
    }

    pub fn with_api_url<S: Into<String>>(mut self, api_url: S) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn access_token(&self) -> Result<String, SinkError> {
        let mut token = self.token.lock().await;
        if token.is_expired() {
            *token = self.auth.refresh(&token).await?;
        }
        Ok(token.access_token.clone())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        if status == StatusCode::UNAUTHORIZED {
            return Err(SinkError::Unauthorized(message));
        }
        Err(SinkError::Api {
            code: i64::from(status.as_u16()),
            message,
        })
    }
}

#[async_trait]
impl PlaylistSink for Spotify {
    fn track_query(&self, track: &Track) -> String {
        format!("artist:{} track:{}", track.artist(), track.title())
    }

    async fn search(&self, query: &str) -> Result<Option<ItemHandle>, SinkError> {
        let access_token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/search", self.api_url))
            .bearer_auth(access_token)
            .query(&[("q", query), ("type", "track"), ("limit", "1")])
            .send()
            .await?;
        let SearchResponse { tracks } = Self::check(response).await?.json().await?;
        Ok(tracks
            .items
            .into_iter()
            .next()
            .map(|item| ItemHandle::new(item.uri)))
    }

    async fn append_to_playlist(
        &self,
        playlist_id: &str,
        items: &[ItemHandle],
    ) -> Result<(), SinkError> {
        let access_token = self.access_token().await?;
        let uris: Vec<_> = items.iter().map(ItemHandle::as_str).collect();
        let response = self
            .client
            .post(format!("{}/playlists/{playlist_id}/tracks", self.api_url))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "uris": uris }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_extracted() {
        assert_eq!(
            code_from_redirect("http://localhost:8888/callback?code=abc123&state=x").unwrap(),
            "abc123"
        );
    }

    #[test]
    fn denied_authorization() {
        assert!(matches!(
            code_from_redirect("http://localhost:8888/callback?error=access_denied"),
            Err(SinkError::Unauthorized(e)) if e == "access_denied"
        ));
        assert!(code_from_redirect("http://localhost:8888/callback").is_err());
        assert!(code_from_redirect("not a url").is_err());
    }

    #[test]
    fn authorize_url_is_encoded() {
        let config = SpotifyConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "http://localhost:8888/callback".to_string(),
            spotify_playlist_id: "list".to_string(),
        };
        let auth = SpotifyAuth::new(reqwest::Client::new(), &config, "/tmp/token.json");
        assert_eq!(
            auth.authorize_url(),
            "https://accounts.spotify.com/authorize?client_id=id&response_type=code\
             &redirect_uri=http%3A%2F%2Flocalhost%3A8888%2Fcallback\
             &scope=playlist-modify-private%20playlist-modify-public"
        );
    }

    #[test]
    fn expiry() {
        let mut token = Token {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        };
        assert!(!token.is_expired());
        token.expires_at = Utc::now().timestamp() + 10;
        assert!(token.is_expired());
    }
}
