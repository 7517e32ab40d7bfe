//! Wait schedules applied between reconnect attempts.
//!
//! Connect failures are retried aggressively with a linear schedule while
//! peer disconnects back off exponentially. Each class keeps its own
//! counter, which decays to zero after a quiet period of twice the class
//! ceiling.

use std::fmt;
use std::time::{Duration, Instant};

use crate::{options::BackoffOptions, StreamError};

/// The two failure classes tracked independently.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FailureClass {
    /// Local or network failure reaching the server, or a 5xx reply.
    Connect,
    /// The server closed the stream on us.
    Disconnect,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Disconnect => f.write_str("disconnect"),
        }
    }
}

/// Snapshot of both failure counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FailureCounts {
    pub connect_failures: u32,
    pub disconnections: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct Counter {
    count: u32,
    last: Option<Instant>,
}

impl Counter {
    fn record(&mut self, now: Instant, reset_after: Duration) -> u32 {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) > reset_after {
                self.count = 0;
            }
        }
        self.last = Some(now);
        self.count = self.count.saturating_add(1);
        self.count
    }
}

/// Failure counters plus the schedule that turns them into waits.
#[derive(Clone, Debug)]
pub struct Backoff {
    options: BackoffOptions,
    connect: Counter,
    disconnect: Counter,
}

impl Backoff {
    pub fn new(options: BackoffOptions) -> Self {
        Self {
            options,
            connect: Counter::default(),
            disconnect: Counter::default(),
        }
    }

    /// Records a failure of `class` at `now` and returns how long to wait.
    ///
    /// Fails with [`StreamError::TooManyFailures`] once the wait would exceed
    /// the class ceiling.
    pub fn next_wait(&mut self, class: FailureClass, now: Instant) -> Result<Duration, StreamError> {
        let ceiling = self.ceiling(class);
        let reset_after = ceiling.saturating_mul(2);
        let attempts = match class {
            FailureClass::Connect => self.connect.record(now, reset_after),
            FailureClass::Disconnect => self.disconnect.record(now, reset_after),
        };

        let wait_ms = match class {
            FailureClass::Connect => self.options.linear_rate_ms.saturating_mul(attempts.into()),
            FailureClass::Disconnect => self
                .options
                .exponential_base
                .checked_pow(attempts)
                .map_or(u64::MAX, |units| units.saturating_mul(self.options.exponential_unit_ms)),
        };
        let wait = Duration::from_millis(wait_ms);

        if wait > ceiling {
            return Err(StreamError::TooManyFailures { class });
        }
        Ok(wait)
    }

    pub fn counts(&self) -> FailureCounts {
        FailureCounts {
            connect_failures: self.connect.count,
            disconnections: self.disconnect.count,
        }
    }

    fn ceiling(&self, class: FailureClass) -> Duration {
        match class {
            FailureClass::Connect => Duration::from_millis(self.options.linear_max_ms),
            FailureClass::Disconnect => Duration::from_millis(self.options.exponential_max_ms),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffOptions::default())
    }
}
