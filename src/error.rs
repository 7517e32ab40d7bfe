use std::io;

use crate::backoff::FailureClass;

/// Classification of transport failures captured by the background worker.
///
/// Handles decide per kind whether a failure is swallowed (with backoff) or
/// surfaced on the next `open()`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connect or read/write exceeded its time limit.
    Timeout,
    /// Socket-level failure: refused, reset, aborted, broken pipe.
    ConnectError,
    /// Anything else the transport reported.
    ProtocolError,
    /// The operation was interrupted.
    Cancelled,
}

impl ErrorKind {
    /// Maps an I/O error onto the coarse kind used for reconnect decisions.
    pub fn of(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::UnexpectedEof => Self::ConnectError,
            io::ErrorKind::Interrupted => Self::Cancelled,
            _ => Self::ProtocolError,
        }
    }

    /// Socket-level kinds are retried with linear backoff when ignorable.
    pub fn is_socket_level(self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectError)
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Backoff ceiling exceeded for a failure class; no automatic retry.
    #[error("too many {class} failures, giving up")]
    TooManyFailures { class: FailureClass },
    /// Server answered the stream with a status that is not ignorable.
    #[error("connection closed by server (status {}): {body}", display_status(.status))]
    ClosedConnection {
        /// Parsed status code, `None` when the response had no status line.
        status: Option<u16>,
        /// Response body as text.
        body: String,
    },
    /// Socket or protocol failure from the background worker.
    #[error("transport error ({kind:?}): {source}")]
    Transport {
        kind: ErrorKind,
        #[source]
        source: io::Error,
    },
    /// The worker is backing off after its connection ended; the chunk was
    /// not queued.
    #[error("stream is backing off after a disconnect, chunk dropped")]
    BackingOff,
    /// Operation requires an open stream.
    #[error("{0}")]
    NotOpen(String),
    /// Payload rejected by the validator.
    #[error("invalid '{trace_type}' data: {message}")]
    Validation { trace_type: String, message: String },
    /// Payload could not be encoded as JSON.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The background worker thread could not be started.
    #[error("failed to start stream worker: {0}")]
    Spawn(io::Error),
}

impl StreamError {
    pub(crate) fn transport(source: io::Error) -> Self {
        Self::Transport {
            kind: ErrorKind::of(&source),
            source,
        }
    }

    /// Returns the transport kind for `Transport` errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

fn display_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "none".to_owned(), |code| code.to_string())
}
