use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::backoff::{Backoff, cancellable_sleep};
use crate::config::PollerConfig;
use crate::error::StreamError;
use crate::metadata::extract;
use crate::sink::{DispatchReport, SinkDispatcher};
use crate::state::ScrobbleState;
use crate::stream::{FrameSource, StreamReader};
use crate::track::Track;

/// Polls one radio stream and reports every track change to the sinks.
///
/// Each iteration reads a frame, extracts the title, feeds the parsed track into the
/// [`ScrobbleState`] and dispatches the resulting change, if any, before sleeping for the poll
/// interval. Dispatches never overlap.
#[derive(Debug)]
pub struct Poller {
    reader: StreamReader,
    dispatcher: SinkDispatcher,
    stream_url: String,
    poll_interval: Duration,
    backoff: Backoff,
    state: ScrobbleState,
}

impl Poller {
    pub fn new<S: Into<String>>(
        reader: StreamReader,
        dispatcher: SinkDispatcher,
        stream_url: S,
        config: &PollerConfig,
    ) -> Self {
        Self {
            reader,
            dispatcher,
            stream_url: stream_url.into(),
            poll_interval: config.poll_interval(),
            backoff: Backoff::new(config.backoff_base(), config.backoff_max()),
            state: ScrobbleState::new(),
        }
    }

    pub fn state(&self) -> &ScrobbleState {
        &self.state
    }

    /// Runs until `cancel` fires. Connection problems are retried with backoff; only an
    /// unusable stream URL ends the loop with an error.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), StreamError> {
        while !cancel.is_cancelled() {
            let opened = tokio::select! {
                () = cancel.cancelled() => break,
                opened = self.reader.open(&self.stream_url) => opened,
            };
            let result = match opened {
                Ok(mut source) => self.poll_stream(&mut source, &cancel).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => break,
                Err(e) if !e.is_retryable() => {
                    error!(error = %e, url = %self.stream_url, "giving up on stream");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %e,
                        failures = self.backoff.failures(),
                        ?delay,
                        "stream failed, reconnecting"
                    );
                    if !cancellable_sleep(delay, &cancel).await {
                        break;
                    }
                }
            }
        }
        info!("poller stopped");
        Ok(())
    }

    // Returns Ok once cancelled, Err when the connection has to be reopened.
    async fn poll_stream<S>(
        &mut self,
        source: &mut FrameSource<S>,
        cancel: &CancellationToken,
    ) -> Result<(), StreamError>
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
    {
        let metaint = source.metadata_interval();
        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                frame = source.next_frame() => frame?,
            };
            self.backoff.reset();
            // a sink that hangs must not keep the poller from shutting down
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = self.observe_frame(&frame, metaint) => {}
            }

            if !cancellable_sleep(self.poll_interval, cancel).await {
                return Ok(());
            }
        }
    }

    /// Runs one frame through extraction, parsing and the state machine, dispatching if the
    /// track changed. Returns the dispatch outcome when a dispatch happened.
    pub async fn observe_frame(
        &mut self,
        frame: &[u8],
        metaint: Option<usize>,
    ) -> Option<DispatchReport> {
        let raw_title = metaint.and_then(|metaint| extract(frame, metaint));
        let track = raw_title.as_deref().and_then(Track::parse);
        if let (Some(raw_title), None) = (&raw_title, &track) {
            trace!(%raw_title, "stream title has no track");
        }

        let change = self.state.observe(track, Utc::now())?;
        info!(track = %change.track, "now playing");
        Some(self.dispatcher.dispatch(&change).await)
    }
}
