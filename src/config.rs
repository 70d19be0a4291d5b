use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::error::ConfigError;

/// Settings read once at startup from a YAML file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub lastfm: LastFmConfig,
    pub radios: Vec<Radio>,
    #[serde(default)]
    pub spotify: Option<SpotifyConfig>,
    #[serde(default)]
    pub poller: PollerConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Radio {
    pub name: String,
    pub stream_url: String,
}

#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct LastFmConfig {
    pub api_key: String,
    pub shared_secret: String,
    pub user_name: String,
    /// md5 hash of the account password, as a hex string
    pub md5_password: String,
}

// keep secrets out of logs
impl std::fmt::Debug for LastFmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastFmConfig")
            .field("api_key", &self.api_key)
            .field("shared_secret", &"<redacted>")
            .field("user_name", &self.user_name)
            .field("md5_password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub spotify_playlist_id: String,
}

impl std::fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("spotify_playlist_id", &self.spotify_playlist_id)
            .finish()
    }
}

/// Timing of the polling loop.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollerConfig {
    pub poll_interval_ms: u64,
    pub read_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    /// Total time allowed for one Last.fm or Spotify request.
    pub request_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            read_timeout_secs: 30,
            connect_timeout_secs: 10,
            backoff_base_ms: 1000,
            backoff_max_secs: 60,
            request_timeout_secs: 15,
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Reads and validates the config file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        contents.parse()
    }

    /// The radio that gets polled. Only the first configured radio is used.
    pub fn radio(&self) -> Option<&Radio> {
        self.radios.first()
    }

    /// Where the Spotify token cache lives for a config file at `config_path`.
    pub fn spotify_token_cache(config_path: &Path) -> PathBuf {
        config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".spotify-token.json")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.radios.is_empty() {
            return invalid("at least one radio must be configured".to_string());
        }
        for radio in &self.radios {
            match Url::parse(&radio.stream_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    return invalid(format!(
                        "stream_url of radio '{}' has unsupported scheme '{}'",
                        radio.name,
                        url.scheme()
                    ));
                }
                Err(e) => {
                    return invalid(format!(
                        "stream_url of radio '{}' is not a valid URL: {e}",
                        radio.name
                    ));
                }
            }
        }

        let lastfm = &self.lastfm;
        for (field, value) in [
            ("api_key", &lastfm.api_key),
            ("shared_secret", &lastfm.shared_secret),
            ("user_name", &lastfm.user_name),
        ] {
            if value.trim().is_empty() {
                return invalid(format!("lastfm.{field} must not be empty"));
            }
        }
        if lastfm.md5_password.len() != 32
            || !lastfm.md5_password.chars().all(|c| c.is_ascii_hexdigit())
        {
            return invalid("lastfm.md5_password must be a hex encoded md5 hash".to_string());
        }

        if let Some(spotify) = &self.spotify {
            for (field, value) in [
                ("client_id", &spotify.client_id),
                ("client_secret", &spotify.client_secret),
                ("spotify_playlist_id", &spotify.spotify_playlist_id),
            ] {
                if value.trim().is_empty() {
                    return invalid(format!("spotify.{field} must not be empty"));
                }
            }
            if let Err(e) = Url::parse(&spotify.redirect_url) {
                return invalid(format!("spotify.redirect_url is not a valid URL: {e}"));
            }
        }

        if self.poller.poll_interval_ms == 0 {
            return invalid("poller.poll_interval_ms must be greater than zero".to_string());
        }
        if self.poller.read_timeout_secs == 0 {
            return invalid("poller.read_timeout_secs must be greater than zero".to_string());
        }
        if self.poller.request_timeout_secs == 0 {
            return invalid("poller.request_timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
