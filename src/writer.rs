use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;
use tokio::sync::watch;

use crate::{
    backoff::{Backoff, FailureCounts},
    queue::OutboundQueue,
    response::ServerResponse,
    session::StreamSession,
    supervisor::{SharedState, StateCell, Worker},
    Chunk, ConnectionState, Result, StreamConfig, StreamError, StreamOptions,
};

/// Handle to one live data stream.
///
/// Chunks written here are queued and delivered by a background worker over
/// a persistent chunked HTTP request. The worker reconnects on demand: when
/// it has stopped, the next [`StreamWriter::write`] or
/// [`StreamWriter::open`] starts a new one, first reporting whatever failure
/// ended the previous connection.
pub struct StreamWriter {
    session: Arc<StreamSession>,
    options: StreamOptions,
    shared: Arc<SharedState>,
    worker: Option<WorkerHandle>,
}

struct WorkerHandle {
    queue: Arc<OutboundQueue>,
    state: Arc<StateCell>,
    stop: watch::Sender<bool>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }
}

impl fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWriter")
            .field("session", &self.session)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

impl StreamWriter {
    /// Creates a writer for the stream identified by `token`.
    ///
    /// Nothing is connected until the first `open()` or `write()`.
    pub fn new(token: impl Into<String>, config: &StreamConfig) -> Self {
        let options = StreamOptions::default();
        Self {
            session: Arc::new(StreamSession::new(token, config)),
            shared: Arc::new(SharedState::new(Backoff::new(options.backoff.clone()))),
            options,
            worker: None,
        }
    }

    /// Applies queueing, timeout and reconnect options.
    ///
    /// Failure counters start over with the new backoff schedule.
    pub fn with_options(mut self, opts: StreamOptions) -> Self {
        self.shared = Arc::new(SharedState::new(Backoff::new(opts.backoff.clone())));
        self.options = opts;
        self
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Whether a background worker exists and is still running.
    ///
    /// A worker that is backing off after a failure still counts as
    /// connected, but its queue is closed: writes fail with
    /// [`StreamError::BackingOff`] and [`StreamWriter::queued`] reports zero
    /// until the worker exits and the next write reconnects.
    pub fn is_connected(&self) -> bool {
        self.worker.as_ref().is_some_and(WorkerHandle::is_alive)
    }

    pub fn state(&self) -> ConnectionState {
        match &self.worker {
            Some(worker) if worker.is_alive() => worker.state.get(),
            _ => ConnectionState::Disconnected,
        }
    }

    /// The reply that ended the last connection, if the server sent one.
    pub fn response(&self) -> Option<ServerResponse> {
        self.shared.response()
    }

    pub fn failures(&self) -> FailureCounts {
        self.shared.counts()
    }

    /// Number of chunks waiting for the current worker.
    pub fn queued(&self) -> usize {
        self.worker.as_ref().map_or(0, |worker| worker.queue.len())
    }

    /// Starts a background worker unless one is already running.
    ///
    /// Returns the failure that ended the previous connection, if it was not
    /// ignorable; the failure is cleared so the following call reconnects.
    pub fn open(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if let Some(err) = self.shared.take_error() {
            self.worker = None;
            return Err(err);
        }
        self.shared.clear_response();

        let queue = Arc::new(OutboundQueue::new(self.options.queue_length));
        let state = Arc::new(StateCell::new(ConnectionState::Connecting));
        let (stop, stop_rx) = watch::channel(false);
        let thread = Worker::new(
            Arc::clone(&self.session),
            self.options.clone(),
            Arc::clone(&queue),
            Arc::clone(&state),
            Arc::clone(&self.shared),
            stop_rx,
        )
        .spawn()
        .map_err(StreamError::Spawn)?;

        self.worker = Some(WorkerHandle {
            queue,
            state,
            stop,
            thread,
        });
        Ok(())
    }

    /// Queues a chunk, opening the stream first if needed.
    ///
    /// JSON values are serialized; text is sent as-is. Every chunk gets one
    /// trailing line break.
    ///
    /// While the worker backs off after a disconnect the chunk is refused
    /// with [`StreamError::BackingOff`].
    pub fn write(&mut self, chunk: impl Into<Chunk>) -> Result<()> {
        let line = chunk.into().into_line()?;
        if !self.is_connected() {
            self.open()?;
        }
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| StreamError::NotOpen("stream worker is not running".to_owned()))?;
        let evicted = worker
            .queue
            .push(line)
            .map_err(|_| StreamError::BackingOff)?;
        if evicted {
            #[cfg(feature = "tracing")]
            tracing::debug!("stream queue full, dropped oldest chunk");
        }
        Ok(())
    }

    /// Serializes `value` as JSON and queues it.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.write(Chunk::json(value)?)
    }

    /// Asks the worker to stop; it exits on its next loop check.
    pub fn close(&mut self) {
        if !self.is_connected() {
            return;
        }
        if let Some(worker) = self.worker.take() {
            worker.stop.send_replace(true);
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.send_replace(true);
        }
    }
}
