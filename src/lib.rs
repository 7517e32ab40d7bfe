//! `plotly-stream` feeds live-updating graphs over Plotly's streaming API.
//!
//! Data is delivered over one long-lived chunked HTTP request per stream,
//! written by a background worker that reconnects with backoff:
//! - [`StreamWriter`] queues raw chunks and manages the connection
//! - [`Stream`] writes validated trace updates on top of it

mod backoff;
mod chunked;
mod config;
mod error;
mod heartbeat;
mod options;
mod queue;
mod response;
mod session;
mod stream;
mod supervisor;
mod types;
pub mod validate;
mod writer;

pub use backoff::{Backoff, FailureClass, FailureCounts};
pub use chunked::{decode_chunks, encode_chunk, encode_handshake, ChunkedWriter};
pub use config::StreamConfig;
pub use error::{ErrorKind, StreamError};
pub use heartbeat::Heartbeat;
pub use options::{BackoffOptions, StreamOptions};
pub use queue::{OutboundQueue, QueueClosed};
pub use response::ServerResponse;
pub use session::StreamSession;
pub use stream::Stream;
pub use types::{Chunk, ConnectionState};
pub use writer::StreamWriter;

pub type Result<T> = std::result::Result<T, StreamError>;
