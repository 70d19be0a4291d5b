use std::io;
use std::path::PathBuf;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Failures while opening or reading the radio stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to connect to stream: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("stream responded with HTTP {0}")]
    Status(StatusCode),

    #[error("failed to read from stream: {0}")]
    Read(#[source] reqwest::Error),

    #[error("no data received from stream for {0:?}")]
    Timeout(Duration),

    #[error("stream ended")]
    Ended,
}

impl StreamError {
    /// Whether the poller should back off and reopen the stream.
    /// Only a request that can't be built at all (e.g. a malformed URL) is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(e) | Self::Read(e) => !e.is_builder(),
            Self::Status(_) | Self::Timeout(_) | Self::Ended => true,
        }
    }
}

/// Failures reported by a scrobble or playlist sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Failures while loading the configuration file. These are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
