use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radio_scrobbler::config::PollerConfig;
use radio_scrobbler::error::{SinkError, StreamError};
use radio_scrobbler::sink::{ScrobbleSink, SinkDispatcher};
use radio_scrobbler::{Poller, ScrobbleState, StreamReader, Track};
use rstest::rstest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const METAINT: usize = 16;

#[derive(Clone, Default)]
struct Recorder {
    tracks: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ScrobbleSink for Recorder {
    async fn report(
        &self,
        artist: &str,
        title: &str,
        _timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        self.tracks
            .lock()
            .unwrap()
            .push(format!("{artist} - {title}"));
        Ok(())
    }
}

/// Accepts every report but never completes it.
#[derive(Clone, Default)]
struct Hanging {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ScrobbleSink for Hanging {
    async fn report(
        &self,
        _artist: &str,
        _title: &str,
        _timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

fn interval(meta: &str) -> Vec<u8> {
    let blocks = meta.len().div_ceil(16);
    let mut data = vec![0x55; METAINT];
    data.push(blocks as u8);
    data.extend_from_slice(meta.as_bytes());
    data.resize(METAINT + 1 + blocks * 16, 0);
    data
}

fn icy_body(title: &str) -> Vec<u8> {
    let mut body = interval(&format!("StreamTitle='{title}';StreamUrl='';"));
    for _ in 0..4 {
        body.extend(interval(""));
    }
    body
}

fn icy_response(title: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("icy-metaint", METAINT.to_string().as_str())
        .insert_header("icy-name", "Test Radio")
        .set_body_bytes(icy_body(title))
}

fn fast_config() -> PollerConfig {
    PollerConfig {
        poll_interval_ms: 10,
        read_timeout_secs: 5,
        connect_timeout_secs: 5,
        backoff_base_ms: 10,
        backoff_max_secs: 1,
        ..PollerConfig::default()
    }
}

fn poller_with(url: String, config: &PollerConfig, scrobbler: Box<dyn ScrobbleSink>) -> Poller {
    let reader = StreamReader::new(config.connect_timeout(), config.read_timeout()).unwrap();
    Poller::new(reader, SinkDispatcher::new(scrobbler), url, config)
}

fn poller(url: String, recorder: &Recorder) -> Poller {
    poller_with(url, &fast_config(), Box::new(recorder.clone()))
}

async fn run_for(poller: &mut Poller, duration: Duration) -> Result<(), StreamError> {
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        stop.cancel();
    });
    poller.run(cancel).await
}

#[tokio::test]
async fn repeated_title_is_scrobbled_once_across_reconnects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .and(header("Icy-MetaData", "1"))
        .respond_with(icy_response("Artist - Title [Radio Edit]"))
        .mount(&server)
        .await;

    let recorder = Recorder::default();
    let mut poller = poller(format!("{}/stream", server.uri()), &recorder);
    run_for(&mut poller, Duration::from_millis(500)).await.unwrap();

    assert_eq!(*recorder.tracks.lock().unwrap(), vec!["Artist - Title"]);
    assert_eq!(
        poller.state().last_track(),
        Some(&Track::new("Artist", "Title"))
    );
    // every connection ends after one body, so the poller had to reconnect
    assert!(server.received_requests().await.unwrap().len() > 1);
}

#[tokio::test]
async fn title_change_after_reconnect_is_scrobbled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(icy_response("A - One"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(icy_response("B - Two"))
        .mount(&server)
        .await;

    let recorder = Recorder::default();
    let mut poller = poller(format!("{}/stream", server.uri()), &recorder);
    run_for(&mut poller, Duration::from_millis(500)).await.unwrap();

    assert_eq!(*recorder.tracks.lock().unwrap(), vec!["A - One", "B - Two"]);
}

#[tokio::test]
async fn stream_without_metaint_never_scrobbles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(b"StreamTitle='A - One';".repeat(32)),
        )
        .mount(&server)
        .await;

    let recorder = Recorder::default();
    let mut poller = poller(format!("{}/stream", server.uri()), &recorder);
    run_for(&mut poller, Duration::from_millis(300)).await.unwrap();

    assert!(recorder.tracks.lock().unwrap().is_empty());
    assert_eq!(poller.state(), &ScrobbleState::NoTrack);
}

#[rstest]
#[case(404)]
#[case(503)]
#[tokio::test]
async fn error_status_is_retried(#[case] status: u16) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;

    let recorder = Recorder::default();
    let mut poller = poller(format!("{}/stream", server.uri()), &recorder);
    run_for(&mut poller, Duration::from_millis(300)).await.unwrap();

    assert!(recorder.tracks.lock().unwrap().is_empty());
    assert!(server.received_requests().await.unwrap().len() > 1);
}

#[tokio::test]
async fn unreachable_stream_keeps_retrying_until_cancelled() {
    // nothing listens on the discard port
    let recorder = Recorder::default();
    let mut poller = poller("http://127.0.0.1:9/stream".to_string(), &recorder);
    assert!(
        run_for(&mut poller, Duration::from_millis(200))
            .await
            .is_ok()
    );
    assert!(recorder.tracks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_url_is_fatal() {
    let recorder = Recorder::default();
    let mut poller = poller("not a url".to_string(), &recorder);
    let result = run_for(&mut poller, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(StreamError::Connect(_))));
}

#[tokio::test]
async fn oversized_metaint_is_treated_as_no_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("icy-metaint", "18446744073709551615")
                .set_body_bytes(icy_body("A - One")),
        )
        .mount(&server)
        .await;

    let recorder = Recorder::default();
    let mut poller = poller(format!("{}/stream", server.uri()), &recorder);
    run_for(&mut poller, Duration::from_millis(300)).await.unwrap();

    assert!(recorder.tracks.lock().unwrap().is_empty());
    assert_eq!(poller.state(), &ScrobbleState::NoTrack);
}

#[tokio::test]
async fn hanging_sink_does_not_block_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(icy_response("A - One"))
        .mount(&server)
        .await;

    let sink = Hanging::default();
    let mut poller = poller_with(
        format!("{}/stream", server.uri()),
        &fast_config(),
        Box::new(sink.clone()),
    );
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        run_for(&mut poller, Duration::from_millis(200)),
    )
    .await;

    assert!(matches!(result, Ok(Ok(()))));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    // the change was committed before the sink was called
    assert_eq!(poller.state().last_track(), Some(&Track::new("A", "One")));
}

// Sends the response headers and part of the first interval, then keeps the connection open
// without sending anything else.
async fn stalled_stream() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/stream", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0; 4096];
        let _ = socket.read(&mut request).await.unwrap();
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nicy-metaint: 16\r\ncontent-type: audio/mpeg\r\n\r\n")
            .await
            .unwrap();
        socket.write_all(&[0x55; METAINT / 2]).await.unwrap();
        socket.flush().await.unwrap();
        std::future::pending::<()>().await;
    });
    (url, server)
}

#[tokio::test]
async fn cancel_interrupts_blocked_read() {
    let (url, server) = stalled_stream().await;
    let config = PollerConfig {
        read_timeout_secs: 600,
        ..fast_config()
    };
    let recorder = Recorder::default();
    let mut poller = poller_with(url, &config, Box::new(recorder.clone()));

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        run_for(&mut poller, Duration::from_millis(200)),
    )
    .await;
    server.abort();

    assert!(matches!(result, Ok(Ok(()))));
    assert!(recorder.tracks.lock().unwrap().is_empty());
}
