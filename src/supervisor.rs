//! Background worker that owns the streaming connection.
//!
//! Each open handle gets one dedicated thread running a single-threaded
//! tokio runtime. The worker connects, sends the handshake, then alternates
//! short reads with single-chunk writes until the server answers, the
//! connection fails, or the handle asks it to stop. Failures are classified
//! and backed off here, then parked in [`SharedState`] for the next
//! `open()`.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::{
    backoff::{Backoff, FailureClass, FailureCounts},
    chunked::ChunkedWriter,
    heartbeat::Heartbeat,
    queue::OutboundQueue,
    response::ServerResponse,
    session::StreamSession,
    ConnectionState, ErrorKind, StreamError, StreamOptions,
};

/// Extra time allowed for the rest of a server reply once its first bytes
/// have arrived.
const RESPONSE_DRAIN: Duration = Duration::from_millis(100);

/// Upper bound on the captured server reply.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

const KEEP_ALIVE: &str = "\n";

/// State that outlives individual workers: failure counters, the last
/// server response and the failure waiting to be reported.
#[derive(Debug)]
pub(crate) struct SharedState {
    backoff: Mutex<Backoff>,
    pending_error: Mutex<Option<StreamError>>,
    response: Mutex<Option<ServerResponse>>,
}

impl SharedState {
    pub(crate) fn new(backoff: Backoff) -> Self {
        Self {
            backoff: Mutex::new(backoff),
            pending_error: Mutex::new(None),
            response: Mutex::new(None),
        }
    }

    pub(crate) fn take_error(&self) -> Option<StreamError> {
        lock(&self.pending_error).take()
    }

    pub(crate) fn clear_response(&self) {
        *lock(&self.response) = None;
    }

    pub(crate) fn response(&self) -> Option<ServerResponse> {
        lock(&self.response).clone()
    }

    pub(crate) fn counts(&self) -> FailureCounts {
        lock(&self.backoff).counts()
    }

    fn store_error(&self, err: StreamError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %err, "stream failure stored for next open");

        *lock(&self.pending_error) = Some(err);
    }

    fn set_response(&self, response: ServerResponse) {
        *lock(&self.response) = Some(response);
    }

    fn next_wait(&self, class: FailureClass) -> Result<Duration, StreamError> {
        lock(&self.backoff).next_wait(class, Instant::now())
    }
}

/// Connection state of one worker, readable from the handle.
#[derive(Debug, Default)]
pub(crate) struct StateCell(Mutex<ConnectionState>);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(Mutex::new(state))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *lock(&self.0)
    }

    fn set(&self, state: ConnectionState) {
        *lock(&self.0) = state;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a connection attempt ended.
#[derive(Debug)]
enum SessionEnd {
    /// The server sent data (possibly nothing before closing).
    Response(Vec<u8>),
    /// The handle asked the worker to stop.
    Stopped,
    Failed(io::Error),
}

pub(crate) struct Worker {
    session: Arc<StreamSession>,
    options: StreamOptions,
    queue: Arc<OutboundQueue>,
    state: Arc<StateCell>,
    shared: Arc<SharedState>,
    stop: watch::Receiver<bool>,
}

impl Worker {
    pub(crate) fn new(
        session: Arc<StreamSession>,
        options: StreamOptions,
        queue: Arc<OutboundQueue>,
        state: Arc<StateCell>,
        shared: Arc<SharedState>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session,
            options,
            queue,
            state,
            shared,
            stop,
        }
    }

    /// Starts the worker on its own thread.
    pub(crate) fn spawn(self) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("plotly-stream".to_owned())
            .spawn(move || self.run_blocking())
    }

    fn run_blocking(self) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();
        match runtime {
            Ok(runtime) => runtime.block_on(self.run()),
            Err(err) => {
                self.state.set(ConnectionState::Disconnected);
                self.shared.store_error(StreamError::transport(err));
            }
        }
    }

    async fn run(mut self) {
        let end = self.connect_and_stream().await;
        self.queue.close();
        self.state.set(ConnectionState::Disconnected);
        self.settle(end).await;
    }

    async fn connect_and_stream(&mut self) -> SessionEnd {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            host = %self.session.host(),
            port = self.session.port(),
            "connecting stream"
        );

        let connect = timeout(
            Duration::from_millis(self.options.connect_timeout_ms),
            TcpStream::connect((self.session.host(), self.session.port())),
        );
        let stream = tokio::select! {
            biased;
            _ = self.stop.wait_for(|stop| *stop) => return SessionEnd::Stopped,
            result = connect => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => return SessionEnd::Failed(err),
                Err(_) => {
                    return SessionEnd::Failed(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "timed out connecting to streaming server",
                    ))
                }
            },
        };

        self.state.set(ConnectionState::Open);
        let (mut reader, writer) = stream.into_split();
        let mut writer = ChunkedWriter::new(writer);
        if let Err(err) = writer.write_handshake(self.session.headers()).await {
            return SessionEnd::Failed(err);
        }

        let end = match self.pump(&mut reader, &mut writer).await {
            Ok(end) => end,
            Err(err) => SessionEnd::Failed(err),
        };
        let _ = writer.shutdown().await;
        end
    }

    /// Read/write loop of an open connection.
    async fn pump(
        &mut self,
        reader: &mut OwnedReadHalf,
        writer: &mut ChunkedWriter<OwnedWriteHalf>,
    ) -> io::Result<SessionEnd> {
        let initial = Duration::from_millis(self.options.initial_read_timeout_ms);
        let poll = Duration::from_millis(self.options.poll_timeout_ms);
        let mut heartbeat = Heartbeat::new(Duration::from_millis(self.options.heartbeat_interval_ms));

        let first = tokio::select! {
            biased;
            _ = self.stop.wait_for(|stop| *stop) => {
                self.state.set(ConnectionState::Closing);
                return Ok(SessionEnd::Stopped);
            }
            read = read_available(reader, initial) => read?,
        };
        if let Some(raw) = first {
            return Ok(SessionEnd::Response(raw));
        }

        loop {
            if *self.stop.borrow() {
                self.state.set(ConnectionState::Closing);
                return Ok(SessionEnd::Stopped);
            }

            if heartbeat.check(Instant::now(), self.queue.is_empty()) {
                #[cfg(feature = "tracing")]
                tracing::debug!("queueing keep-alive chunk");
                let _ = self.queue.push(KEEP_ALIVE.to_owned());
            }

            if let Some(raw) = read_available(reader, poll).await? {
                return Ok(SessionEnd::Response(raw));
            }

            if let Some(chunk) = self.queue.pop() {
                writer.write_chunk(chunk.as_bytes()).await?;
                heartbeat.record_activity(Instant::now());
            }
        }
    }

    /// Classifies how the connection ended, backs off and records failures.
    async fn settle(&mut self, end: SessionEnd) {
        match end {
            SessionEnd::Stopped => {
                #[cfg(feature = "tracing")]
                tracing::debug!("stream worker stopped");
            }
            SessionEnd::Response(raw) => {
                let response = ServerResponse::parse(&raw);
                let status = response.status;

                #[cfg(feature = "tracing")]
                tracing::debug!(?status, "server closed stream");

                // 5xx is the server's fault: retry like a connect failure.
                let class = if status.is_some_and(|code| code >= 500) {
                    FailureClass::Connect
                } else {
                    FailureClass::Disconnect
                };
                let ignorable = self.options.ignores_status(status);
                self.shared.set_response(response.clone());

                if let Err(err) = self.back_off(class).await {
                    self.shared.store_error(err);
                    return;
                }
                if !ignorable {
                    self.shared.store_error(StreamError::ClosedConnection {
                        status,
                        body: response.body,
                    });
                }
            }
            SessionEnd::Failed(err) => {
                let kind = ErrorKind::of(&err);
                if !self.options.ignores_error(kind) {
                    self.shared.store_error(StreamError::Transport { kind, source: err });
                    return;
                }

                #[cfg(feature = "tracing")]
                tracing::debug!(?kind, error = %err, "ignoring stream error");

                if kind.is_socket_level() {
                    if let Err(err) = self.back_off(FailureClass::Connect).await {
                        self.shared.store_error(err);
                    }
                }
            }
        }
    }

    /// Sleeps for the next wait of `class`; a stop request cuts it short.
    async fn back_off(&mut self, class: FailureClass) -> Result<(), StreamError> {
        let wait = self.shared.next_wait(class)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%class, wait_ms = wait.as_millis() as u64, "backing off");

        tokio::select! {
            _ = sleep(wait) => {}
            _ = self.stop.wait_for(|stop| *stop) => {}
        }
        Ok(())
    }
}

/// Reads whatever the peer sent within `wait`.
///
/// Returns `None` on timeout. A peer that closes without sending anything
/// yields an empty buffer. At most [`MAX_RESPONSE_BYTES`] are kept.
async fn read_available<R: AsyncRead + Unpin>(
    reader: &mut R,
    wait: Duration,
) -> io::Result<Option<Vec<u8>>> {
    let mut buf = [0u8; 4096];
    let read = match timeout(wait, reader.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => return Ok(None),
    };
    let mut data = buf[..read].to_vec();
    if read == 0 {
        return Ok(Some(data));
    }

    while data.len() < MAX_RESPONSE_BYTES {
        match timeout(RESPONSE_DRAIN, reader.read(&mut buf)).await {
            Ok(Ok(read)) if read > 0 => data.extend_from_slice(&buf[..read]),
            _ => break,
        }
    }
    data.truncate(MAX_RESPONSE_BYTES);
    Ok(Some(data))
}
