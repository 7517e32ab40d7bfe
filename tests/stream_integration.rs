use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use plotly_stream::{
    decode_chunks, BackoffOptions, ConnectionState, ErrorKind, Stream, StreamConfig, StreamError,
    StreamOptions, StreamWriter,
};
use serde_json::{json, Value as JsonValue};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

#[derive(Clone, Copy)]
enum Reply {
    /// Keep reading forever.
    Silent,
    /// Send this raw response once the request head arrived, then hang up.
    Raw(&'static str),
}

struct TestServer {
    port: u16,
    connections: Arc<Mutex<Vec<Vec<u8>>>>,
    accepted: Arc<AtomicUsize>,
    /// Connections the client hung up on.
    hung_up: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn config(&self) -> StreamConfig {
        StreamConfig::new("127.0.0.1", self.port)
    }

    /// Raw bytes received on the first connection.
    fn received(&self) -> Vec<u8> {
        self.connections
            .lock()
            .expect("connection log mutex must not be poisoned")
            .first()
            .cloned()
            .unwrap_or_default()
    }

    fn head(&self) -> String {
        let raw = self.received();
        let text = String::from_utf8_lossy(&raw);
        text.split("\r\n\r\n").next().unwrap_or_default().to_owned()
    }

    /// Decoded chunk payloads received on the first connection.
    fn chunks(&self) -> Vec<String> {
        let raw = self.received();
        let Some(start) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
            return Vec::new();
        };
        decode_chunks(&raw[start + 4..])
            .into_iter()
            .map(|chunk| String::from_utf8(chunk).expect("chunks must be utf-8"))
            .collect()
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    reply: Reply,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
    hung_up: Arc<AtomicUsize>,
) {
    let index = {
        let mut log = log.lock().expect("connection log mutex must not be poisoned");
        log.push(Vec::new());
        log.len() - 1
    };
    let mut buf = [0u8; 4096];
    loop {
        let read = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => {
                hung_up.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Ok(read) => read,
        };
        let head_complete = {
            let mut log = log.lock().expect("connection log mutex must not be poisoned");
            log[index].extend_from_slice(&buf[..read]);
            log[index].windows(4).any(|w| w == b"\r\n\r\n")
        };
        if let Reply::Raw(response) = reply {
            if head_complete {
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                return;
            }
        }
    }
}

async fn spawn_server(reply: Reply) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let port = listener.local_addr().expect("must have local addr").port();
    let connections = Arc::new(Mutex::new(Vec::new()));
    let accepted = Arc::new(AtomicUsize::new(0));
    let hung_up = Arc::new(AtomicUsize::new(0));

    let task = {
        let connections = Arc::clone(&connections);
        let accepted = Arc::clone(&accepted);
        let hung_up = Arc::clone(&hung_up);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(
                    socket,
                    reply,
                    Arc::clone(&connections),
                    Arc::clone(&hung_up),
                ));
            }
        })
    };

    TestServer {
        port,
        connections,
        accepted,
        hung_up,
        task,
    }
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind listener for a closed port");
    listener.local_addr().expect("must have local addr").port()
}

fn fast_options() -> StreamOptions {
    StreamOptions {
        initial_read_timeout_ms: 50,
        backoff: BackoffOptions {
            linear_rate_ms: 10,
            linear_max_ms: 1_000,
            exponential_base: 5,
            exponential_unit_ms: 1,
            exponential_max_ms: 320,
        },
        ..StreamOptions::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn write_on_unopened_writer_opens_and_delivers_chunk() {
    let server = spawn_server(Reply::Silent).await;
    let mut writer = StreamWriter::new("tok-123", &server.config()).with_options(fast_options());
    assert!(!writer.is_connected());

    writer
        .write(json!({"x": 1, "y": 2}))
        .expect("write must auto-open");
    assert!(writer.is_connected());

    assert!(wait_until(|| !server.chunks().is_empty()).await);
    assert_eq!(server.chunks(), vec!["{\"x\":1,\"y\":2}\n".to_owned()]);

    let head = server.head();
    assert!(head.starts_with("POST / HTTP/1.1\r\n"));
    assert!(head.contains("Plotly-Streamtoken: tok-123\r\n"));
    assert!(head.contains("Host: 127.0.0.1\r\n"));
    assert!(head.contains("Transfer-Encoding: chunked\r\n"));
    assert!(head.contains("Content-Type: text/plain"));
    assert_eq!(writer.state(), ConnectionState::Open);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);

    writer.close();
    assert!(!writer.is_connected());
    assert_eq!(writer.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn queued_chunks_are_sent_newest_first() {
    let server = spawn_server(Reply::Silent).await;
    let opts = StreamOptions {
        initial_read_timeout_ms: 300,
        ..fast_options()
    };
    let mut writer = StreamWriter::new("tok", &server.config()).with_options(opts);

    for text in ["a", "b", "c"] {
        writer.write(text).expect("write must succeed");
    }

    assert!(wait_until(|| server.chunks().len() == 3).await);
    assert_eq!(server.chunks(), vec!["c\n", "b\n", "a\n"]);
}

#[tokio::test]
async fn full_queue_keeps_the_most_recent_chunks() {
    let server = spawn_server(Reply::Silent).await;
    let opts = StreamOptions {
        initial_read_timeout_ms: 5_000,
        ..fast_options()
    };
    let mut writer = StreamWriter::new("tok", &server.config()).with_options(opts);

    for n in 0..600 {
        writer.write(n.to_string()).expect("write must succeed");
    }
    assert_eq!(writer.queued(), 500);
    writer.close();
}

#[tokio::test]
async fn server_error_status_backs_off_linearly() {
    let server = spawn_server(Reply::Raw(
        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\n\r\nboom",
    ))
    .await;
    let opts = StreamOptions {
        ignore_status_codes: vec![None, Some(200), Some(500)],
        ..fast_options()
    };
    let mut writer = StreamWriter::new("tok", &server.config()).with_options(opts);

    writer.open().expect("open must start worker");
    assert!(wait_until(|| !writer.is_connected()).await);

    let failures = writer.failures();
    assert_eq!(failures.connect_failures, 1);
    assert_eq!(failures.disconnections, 0);

    let response = writer.response().expect("response must be captured");
    assert_eq!(response.status, Some(500));
    assert_eq!(response.body, "boom");

    writer.open().expect("ignorable status must reconnect quietly");
    writer.close();
}

#[tokio::test]
async fn not_found_status_backs_off_exponentially_and_reports_on_open() {
    let server = spawn_server(Reply::Raw(
        "HTTP/1.1 404 Not Found\r\nContent-Length: 16\r\n\r\nstream not found",
    ))
    .await;
    let mut writer = StreamWriter::new("tok", &server.config()).with_options(fast_options());

    writer.open().expect("open must start worker");
    assert!(wait_until(|| !writer.is_connected()).await);

    let failures = writer.failures();
    assert_eq!(failures.connect_failures, 0);
    assert_eq!(failures.disconnections, 1);

    match writer.open() {
        Err(StreamError::ClosedConnection { status, body }) => {
            assert_eq!(status, Some(404));
            assert_eq!(body, "stream not found");
        }
        other => panic!("expected closed connection, got {other:?}"),
    }

    writer.open().expect("reported failure is cleared");
    assert!(writer.is_connected());
    writer.close();
}

#[tokio::test]
async fn write_surfaces_stored_failure_instead_of_queueing() {
    let server = spawn_server(Reply::Raw("HTTP/1.1 403 Forbidden\r\n\r\n")).await;
    let mut writer = StreamWriter::new("tok", &server.config()).with_options(fast_options());

    writer.write("first").expect("first write opens the stream");
    assert!(wait_until(|| !writer.is_connected()).await);

    let err = writer.write("second").expect_err("stored failure must surface");
    assert!(matches!(
        err,
        StreamError::ClosedConnection {
            status: Some(403),
            ..
        }
    ));
    assert_eq!(writer.queued(), 0);
}

#[tokio::test]
async fn close_during_initial_read_hangs_up_promptly() {
    let server = spawn_server(Reply::Silent).await;
    let opts = StreamOptions {
        initial_read_timeout_ms: 10_000,
        ..fast_options()
    };
    let mut writer = StreamWriter::new("tok", &server.config()).with_options(opts);

    writer.open().expect("open must start worker");
    assert!(wait_until(|| server.head().contains("Plotly-Streamtoken: tok")).await);

    writer.close();
    assert!(wait_until(|| server.hung_up.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn writes_while_backing_off_are_refused() {
    let server = spawn_server(Reply::Raw("HTTP/1.1 200 OK\r\n\r\n")).await;
    let opts = StreamOptions {
        backoff: BackoffOptions {
            exponential_unit_ms: 100,
            exponential_max_ms: 32_000,
            ..fast_options().backoff
        },
        ..fast_options()
    };
    let mut writer = StreamWriter::new("tok", &server.config()).with_options(opts);

    writer.open().expect("open must start worker");
    assert!(wait_until(|| writer.response().is_some()).await);

    assert!(writer.is_connected());
    assert_eq!(writer.state(), ConnectionState::Disconnected);
    let err = writer.write("late").expect_err("backing-off worker must refuse chunks");
    assert!(matches!(err, StreamError::BackingOff));
    assert_eq!(writer.queued(), 0);

    assert!(wait_until(|| !writer.is_connected()).await);
    writer.write("again").expect("write after backoff must reconnect");
    assert!(writer.is_connected());
    writer.close();
}

#[tokio::test]
async fn repeated_disconnects_give_up() {
    let server = spawn_server(Reply::Raw("HTTP/1.1 200 OK\r\n\r\n")).await;
    let mut writer = StreamWriter::new("tok", &server.config()).with_options(fast_options());

    let mut outcome = Ok(());
    for _ in 0..4 {
        outcome = writer.open();
        if outcome.is_err() {
            break;
        }
        assert!(wait_until(|| !writer.is_connected()).await);
    }
    if outcome.is_ok() {
        outcome = writer.open();
    }

    assert!(matches!(
        outcome,
        Err(StreamError::TooManyFailures { .. })
    ));
    assert_eq!(writer.failures().disconnections, 4);
}

#[tokio::test]
async fn refused_connection_is_reported_on_next_open() {
    let port = closed_port().await;
    let mut writer = StreamWriter::new("tok", &StreamConfig::new("127.0.0.1", port))
        .with_options(fast_options());

    writer.open().expect("open must start worker");
    assert!(wait_until(|| !writer.is_connected()).await);

    let err = writer.open().expect_err("refused connection must surface");
    assert_eq!(err.kind(), Some(ErrorKind::ConnectError));
    assert_eq!(writer.failures().connect_failures, 0);
}

#[tokio::test]
async fn ignorable_connect_errors_back_off_linearly() {
    let port = closed_port().await;
    let opts = StreamOptions {
        ignore_errors: vec![ErrorKind::ConnectError],
        ..fast_options()
    };
    let mut writer =
        StreamWriter::new("tok", &StreamConfig::new("127.0.0.1", port)).with_options(opts);

    writer.open().expect("open must start worker");
    assert!(wait_until(|| !writer.is_connected()).await);

    assert_eq!(writer.failures().connect_failures, 1);
    writer.open().expect("ignored error must not surface");
    writer.close();
}

#[tokio::test]
async fn idle_stream_sends_keep_alive_chunks() {
    let server = spawn_server(Reply::Silent).await;
    let opts = StreamOptions {
        heartbeat_interval_ms: 100,
        ..fast_options()
    };
    let mut writer = StreamWriter::new("tok", &server.config()).with_options(opts);
    writer.open().expect("open must start worker");

    assert!(wait_until(|| !server.chunks().is_empty()).await);
    assert!(server.chunks().iter().all(|chunk| chunk == "\n"));
    writer.close();
}

#[tokio::test]
async fn trace_stream_strips_type_and_merges_layout() {
    let server = spawn_server(Reply::Silent).await;
    let mut stream = Stream::new("trace-token", server.config()).with_options(fast_options());

    stream.open().expect("open must succeed");
    assert!(stream.is_open());
    stream
        .write(
            json!({"type": "scatter", "x": 1, "y": 2}),
            Some(json!({"title": "live"})),
            true,
        )
        .expect("valid trace must be written");

    assert!(wait_until(|| !server.chunks().is_empty()).await);
    let sent: JsonValue =
        serde_json::from_str(server.chunks()[0].trim_end()).expect("chunk must be json");
    assert_eq!(sent, json!({"x": 1, "y": 2, "layout": {"title": "live"}}));
    assert!(server.head().contains("Plotly-Streamtoken: trace-token"));

    stream.heartbeat().expect("heartbeat must be queued");
    assert!(wait_until(|| server.chunks().len() == 2).await);
    assert_eq!(server.chunks()[1], "\n");

    stream.close().expect("close must succeed");
    assert!(!stream.writer().expect("writer exists").is_connected());
}
