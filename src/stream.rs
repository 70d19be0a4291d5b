use std::fmt::{self, Debug};
use std::num::NonZeroUsize;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::headers::{ICY_METAINT_HEADER, IcyHeaders, RequestIcyMetadata};
use crate::metadata::ICY_METADATA_MULTIPLIER;

pub const USER_AGENT: &str = concat!("radio-scrobbler/", env!("CARGO_PKG_VERSION"));

/// Chunks of an HTTP response body as produced by reqwest.
pub type HttpChunks = BoxStream<'static, reqwest::Result<Bytes>>;

/// Opens icy streams with in-band metadata requested.
#[derive(Clone, Debug)]
pub struct StreamReader {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl StreamReader {
    /// Creates a reader with its own HTTP client.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(StreamError::Connect)?;
        Ok(Self::with_client(client, read_timeout))
    }

    /// Creates a reader using an existing client. The client must not impose a total request
    /// timeout since the response body never ends.
    pub fn with_client(client: reqwest::Client, read_timeout: Duration) -> Self {
        Self {
            client,
            read_timeout,
        }
    }

    /// Connects to `url` and returns the source of frames for that connection.
    pub async fn open(&self, url: &str) -> Result<FrameSource<HttpChunks>, StreamError> {
        let request = self.client.get(url).request_icy_metadata().send();
        let response = tokio::time::timeout(self.read_timeout, request)
            .await
            .map_err(|_| StreamError::Timeout(self.read_timeout))?
            .map_err(StreamError::Connect)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status));
        }

        let headers = IcyHeaders::parse_from_headers(response.headers());
        info!(
            url,
            station = headers.name(),
            genre = headers.genre(),
            bitrate = headers.bitrate(),
            metaint = headers.metadata_interval().map(NonZeroUsize::get),
            "connected to stream"
        );
        if headers.metadata_interval().is_none() {
            match response.headers().get(ICY_METAINT_HEADER) {
                Some(raw) => warn!(
                    url,
                    metaint = ?raw,
                    "ignoring unusable icy-metaint, no tracks will be detected"
                ),
                None => info!(url, "stream has no icy-metaint header, no tracks will be detected"),
            }
        }

        Ok(FrameSource::new(
            response.bytes_stream().boxed(),
            headers,
            self.read_timeout,
        ))
    }
}

/// Lazy, unbounded sequence of frames read from one stream connection.
///
/// With a metadata interval every frame starts at an interval boundary and holds `metaint` audio
/// bytes followed by one complete metadata block, so the block is never split across frames.
/// Frames that arrived while the poller was idle are coalesced: the newest interval that carries
/// metadata is returned so a title update is never skipped.
///
/// Without a metadata interval frames are whatever chunks the connection delivered.
pub struct FrameSource<S> {
    chunks: S,
    headers: IcyHeaders,
    buffer: BytesMut,
    read_timeout: Duration,
    deferred_error: Option<StreamError>,
}

impl<S> Debug for FrameSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSource")
            .field("chunks", &"<chunks>")
            .field("headers", &self.headers)
            .field("buffer", &self.buffer.len())
            .field("read_timeout", &self.read_timeout)
            .field("deferred_error", &self.deferred_error)
            .finish()
    }
}

impl<S> FrameSource<S>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    pub fn new(chunks: S, headers: IcyHeaders, read_timeout: Duration) -> Self {
        Self {
            chunks,
            headers,
            buffer: BytesMut::new(),
            read_timeout,
            deferred_error: None,
        }
    }

    pub fn headers(&self) -> &IcyHeaders {
        &self.headers
    }

    /// Number of audio bytes between metadata blocks, if the stream has any.
    pub fn metadata_interval(&self) -> Option<usize> {
        self.headers.metadata_interval().map(NonZeroUsize::get)
    }

    /// Waits for the next frame.
    pub async fn next_frame(&mut self) -> Result<Bytes, StreamError> {
        let Some(metaint) = self.metadata_interval() else {
            self.fill(1).await?;
            self.drain_ready();
            return Ok(self.buffer.split().freeze());
        };

        self.fill_interval(metaint).await?;
        let mut frame = self.take_interval(metaint);

        self.drain_ready();
        let mut skipped = 0;
        while let Some(len) = self.buffered_interval_len(metaint) {
            let next = self.buffer.split_to(len).freeze();
            if has_metadata(&next, metaint) || !has_metadata(&frame, metaint) {
                frame = next;
            }
            skipped += 1;
        }
        if skipped > 0 {
            debug!(skipped, "caught up with buffered intervals");
        }
        Ok(frame)
    }

    async fn fill_interval(&mut self, metaint: usize) -> Result<(), StreamError> {
        self.fill(metaint + 1).await?;
        let len = interval_len(&self.buffer, metaint);
        self.fill(len).await
    }

    fn take_interval(&mut self, metaint: usize) -> Bytes {
        let len = interval_len(&self.buffer, metaint);
        self.buffer.split_to(len).freeze()
    }

    fn buffered_interval_len(&self, metaint: usize) -> Option<usize> {
        if self.buffer.len() <= metaint {
            return None;
        }
        let len = interval_len(&self.buffer, metaint);
        (self.buffer.len() >= len).then_some(len)
    }

    async fn fill(&mut self, len: usize) -> Result<(), StreamError> {
        while self.buffer.len() < len {
            if let Some(e) = self.deferred_error.take() {
                return Err(e);
            }
            let chunk = tokio::time::timeout(self.read_timeout, self.chunks.next())
                .await
                .map_err(|_| StreamError::Timeout(self.read_timeout))?;
            match chunk {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(StreamError::Read(e)),
                None => return Err(StreamError::Ended),
            }
        }
        Ok(())
    }

    // Pulls in every chunk that's already available without waiting. Errors are kept for the next
    // call so the frame that's already complete isn't lost.
    fn drain_ready(&mut self) {
        while self.deferred_error.is_none() {
            match self.chunks.next().now_or_never() {
                Some(Some(Ok(chunk))) => self.buffer.extend_from_slice(&chunk),
                Some(Some(Err(e))) => self.deferred_error = Some(StreamError::Read(e)),
                Some(None) => self.deferred_error = Some(StreamError::Ended),
                None => break,
            }
        }
    }
}

fn interval_len(buffer: &[u8], metaint: usize) -> usize {
    metaint + 1 + buffer[metaint] as usize * ICY_METADATA_MULTIPLIER
}

fn has_metadata(frame: &[u8], metaint: usize) -> bool {
    frame.get(metaint).is_some_and(|&len| len > 0)
}
