use std::time::{Duration, Instant};

/// Tracks idle time on a stream.
///
/// The server drops streams after about a minute without data, so the
/// worker queues an empty chunk once per interval while nothing is pending.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    interval: Duration,
    last_beat: Option<Instant>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_beat: None,
        }
    }

    /// Returns `true` when a keep-alive chunk should be queued now.
    ///
    /// The first call only starts the clock. Once the interval elapses the
    /// clock restarts whether or not a beat is due, so at most one beat is
    /// produced per window.
    pub fn check(&mut self, now: Instant, queue_empty: bool) -> bool {
        let last = *self.last_beat.get_or_insert(now);
        if now.saturating_duration_since(last) <= self.interval {
            return false;
        }
        self.last_beat = Some(now);
        queue_empty
    }

    /// Restarts the idle clock after a real chunk went out.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_beat = Some(now);
    }
}
