//! Scrobbling to Last.fm through the 2.0 web service.
//!
//! Authentication uses the mobile session flow: the session key is requested with the user name
//! and `md5(user_name + md5(password))`, so the plain password never has to be configured. Every
//! write call is signed with `api_sig`, the md5 of all parameters sorted by name and concatenated
//! as `namevalue`, followed by the shared secret.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LastFmConfig;
use crate::error::SinkError;
use crate::sink::ScrobbleSink;

pub const API_URL: &str = "https://ws.audioscrobbler.com/2.0/";

// https://www.last.fm/api/errorcodes
const INVALID_SESSION_KEY: i64 = 9;

/// Last.fm client acting as the scrobble sink.
pub struct LastFm {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    shared_secret: String,
    user_name: String,
    password_hash: String,
    session_key: Mutex<Option<String>>,
}

impl std::fmt::Debug for LastFm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastFm")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key)
            .field("user_name", &self.user_name)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    session: Session,
}

#[derive(Deserialize)]
struct Session {
    name: String,
    key: String,
}

#[derive(Deserialize)]
struct ScrobbleResponse {
    scrobbles: Scrobbles,
}

#[derive(Deserialize)]
struct Scrobbles {
    #[serde(rename = "@attr")]
    attr: ScrobbleCounts,
}

#[derive(Deserialize)]
struct ScrobbleCounts {
    #[serde(deserialize_with = "number_or_string")]
    accepted: u64,
    #[serde(deserialize_with = "number_or_string")]
    ignored: u64,
}

// Last.fm's JSON is converted from XML and numbers show up as either strings or numbers
fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(u64),
        String(String),
    }
    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n),
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Computes `api_sig` for the given request parameters.
pub fn sign(params: &BTreeMap<&str, String>, shared_secret: &str) -> String {
    let mut payload = String::new();
    for (key, value) in params {
        if *key == "format" || *key == "callback" {
            continue;
        }
        payload.push_str(key);
        payload.push_str(value);
    }
    payload.push_str(shared_secret);
    md5_hex(&payload)
}

impl LastFm {
    pub fn new(client: reqwest::Client, config: &LastFmConfig) -> Self {
        Self {
            client,
            api_url: API_URL.to_string(),
            api_key: config.api_key.clone(),
            shared_secret: config.shared_secret.clone(),
            user_name: config.user_name.clone(),
            password_hash: config.md5_password.to_lowercase(),
            session_key: Mutex::new(None),
        }
    }

    /// Sends requests to `api_url` instead of the public endpoint.
    pub fn with_api_url<S: Into<String>>(mut self, api_url: S) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn call<T>(&self, mut params: BTreeMap<&str, String>) -> Result<T, SinkError>
    where
        T: for<'de> Deserialize<'de>,
    {
        params.insert("api_key", self.api_key.clone());
        let signature = sign(&params, &self.shared_secret);
        params.insert("api_sig", signature);
        params.insert("format", "json".to_string());

        let response = self.client.post(&self.api_url).form(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if let Ok(ErrorResponse { error, message }) = serde_json::from_str(&body) {
            return Err(SinkError::Api {
                code: error,
                message,
            });
        }
        if !status.is_success() {
            return Err(SinkError::InvalidResponse(format!("HTTP {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| SinkError::InvalidResponse(e.to_string()))
    }

    async fn session_key(&self, cached: &mut Option<String>) -> Result<String, SinkError> {
        if let Some(key) = cached {
            return Ok(key.clone());
        }

        let auth_token = md5_hex(&format!("{}{}", self.user_name, self.password_hash));
        let params = BTreeMap::from([
            ("method", "auth.getMobileSession".to_string()),
            ("username", self.user_name.clone()),
            ("authToken", auth_token),
        ]);
        let SessionResponse { session } = self.call(params).await.map_err(|e| match e {
            SinkError::Api { code, message } => {
                SinkError::Unauthorized(format!("Last.fm error {code}: {message}"))
            }
            e => e,
        })?;
        info!(user = %session.name, "authenticated with Last.fm");
        *cached = Some(session.key.clone());
        Ok(session.key)
    }
}

#[async_trait]
impl ScrobbleSink for LastFm {
    async fn report(
        &self,
        artist: &str,
        title: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        // held for the whole call so concurrent reports don't request two sessions
        let mut cached = self.session_key.lock().await;
        let session_key = self.session_key(&mut cached).await?;

        let params = BTreeMap::from([
            ("method", "track.scrobble".to_string()),
            ("artist", artist.to_string()),
            ("track", title.to_string()),
            ("timestamp", timestamp.timestamp().to_string()),
            ("sk", session_key),
        ]);
        let response: ScrobbleResponse = match self.call(params).await {
            Ok(response) => response,
            Err(e @ SinkError::Api { code, .. }) if code == INVALID_SESSION_KEY => {
                debug!("Last.fm session expired");
                *cached = None;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let ScrobbleCounts { accepted, ignored } = response.scrobbles.attr;
        if ignored > 0 || accepted == 0 {
            warn!(artist, title, accepted, ignored, "Last.fm ignored the scrobble");
        }
        Ok(())
    }
}
