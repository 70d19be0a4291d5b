use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use radio_scrobbler::config::{Config, SpotifyConfig};
use radio_scrobbler::error::SinkError;
use radio_scrobbler::lastfm::LastFm;
use radio_scrobbler::sink::{PlaylistTarget, SinkDispatcher, http_client};
use radio_scrobbler::spotify::{Spotify, SpotifyAuth};
use radio_scrobbler::{Poller, StreamReader};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "radio-scrobbler",
    about = "Scrobbles the tracks played by an internet radio stream",
    version
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("radio-scrobble")
        .join("config.yaml")
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn spotify_target(
    client: &reqwest::Client,
    config: &SpotifyConfig,
    config_path: &Path,
) -> Result<PlaylistTarget, SinkError> {
    let auth = SpotifyAuth::new(
        client.clone(),
        config,
        Config::spotify_token_cache(config_path),
    );
    let token = match auth.cached_token().await {
        Some(token) => token,
        None => {
            eprintln!("Open this URL to allow adding tracks to your Spotify playlist:");
            eprintln!("{}", auth.authorize_url());
            eprintln!("Then paste the URL you were redirected to:");
            let mut line = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await
                .map_err(|e| SinkError::Unauthorized(format!("failed to read stdin: {e}")))?;
            let token = auth.authorize(&line).await?;
            info!(path = %auth.cache_path().display(), "cached Spotify token");
            token
        }
    };
    let spotify = Spotify::new(client.clone(), auth, token);
    Ok(PlaylistTarget::new(
        Box::new(spotify),
        config.spotify_playlist_id.clone(),
    ))
}

async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for ctrl-c");
                return;
            }
        }
        () = terminate => {}
    }
    info!("shutting down");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %config_path.display(), "invalid config");
            return ExitCode::FAILURE;
        }
    };
    let Some(radio) = config.radio() else {
        error!("no radio configured");
        return ExitCode::FAILURE;
    };

    let client = match http_client(config.poller.request_timeout()) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to create HTTP client");
            return ExitCode::FAILURE;
        }
    };
    let lastfm = LastFm::new(client.clone(), &config.lastfm);
    let mut dispatcher = SinkDispatcher::new(Box::new(lastfm));
    if let Some(spotify) = &config.spotify {
        match spotify_target(&client, spotify, &config_path).await {
            Ok(target) => dispatcher = dispatcher.with_playlist(target),
            Err(e) => warn!(error = %e, "Spotify unavailable, continuing without playlist"),
        }
    }

    let reader = match StreamReader::new(
        config.poller.connect_timeout(),
        config.poller.read_timeout(),
    ) {
        Ok(reader) => reader,
        Err(e) => {
            error!(error = %e, "failed to create HTTP client");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    info!(
        radio = %radio.name,
        url = %radio.stream_url,
        playlist = dispatcher.has_playlist(),
        "starting"
    );
    let mut poller = Poller::new(
        reader,
        dispatcher,
        radio.stream_url.clone(),
        &config.poller,
    );
    match poller.run(cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "poller failed");
            ExitCode::FAILURE
        }
    }
}
