use crate::ErrorKind;

/// Configures queueing, timeouts and reconnect behavior of a stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamOptions {
    /// Maximum number of chunks held while waiting to reach the server.
    pub queue_length: usize,
    /// Timeout for establishing the TCP connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// How long to wait for an immediate server reply after the handshake.
    pub initial_read_timeout_ms: u64,
    /// Read timeout of the steady-state poll loop, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Idle time after which a keep-alive chunk is queued, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Server statuses that trigger a quiet reconnect instead of an error.
    ///
    /// `None` stands for a reply without a parsable status line.
    pub ignore_status_codes: Vec<Option<u16>>,
    /// Transport failure kinds that trigger a quiet reconnect.
    pub ignore_errors: Vec<ErrorKind>,
    /// Wait schedule applied between reconnects.
    pub backoff: BackoffOptions,
}

impl StreamOptions {
    pub(crate) fn ignores_status(&self, status: Option<u16>) -> bool {
        self.ignore_status_codes.contains(&status)
    }

    pub(crate) fn ignores_error(&self, kind: ErrorKind) -> bool {
        self.ignore_errors.contains(&kind)
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            queue_length: 500,
            connect_timeout_ms: 60_000,
            initial_read_timeout_ms: 4_000,
            poll_timeout_ms: 10,
            heartbeat_interval_ms: 30_000,
            ignore_status_codes: vec![None, Some(200), Some(408)],
            ignore_errors: Vec::new(),
            backoff: BackoffOptions::default(),
        }
    }
}

/// Constants of the two backoff schedules.
///
/// Connect failures wait `n * linear_rate_ms`; peer disconnects wait
/// `exponential_base ^ n` units of `exponential_unit_ms`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackoffOptions {
    pub linear_rate_ms: u64,
    pub linear_max_ms: u64,
    pub exponential_base: u64,
    pub exponential_unit_ms: u64,
    pub exponential_max_ms: u64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            linear_rate_ms: 250,
            linear_max_ms: 16_000,
            exponential_base: 5,
            exponential_unit_ms: 1_000,
            exponential_max_ms: 320_000,
        }
    }
}
