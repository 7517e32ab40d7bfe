use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Returned by [`OutboundQueue::push`] once the worker stopped draining.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueueClosed;

impl fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("outbound queue is closed")
    }
}

impl std::error::Error for QueueClosed {}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<String>,
    closed: bool,
}

/// Bounded buffer of chunks waiting for the worker.
///
/// New chunks go to the front and are handed out first; once the queue is
/// full the oldest chunk at the back is dropped to make room. The worker
/// closes the queue when its connection ends.
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
        }
    }

    /// Admits `chunk`, evicting the oldest entry when at capacity.
    ///
    /// Returns `Ok(true)` when an older chunk was dropped.
    pub fn push(&self, chunk: String) -> Result<bool, QueueClosed> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(QueueClosed);
        }
        if self.capacity == 0 {
            return Ok(true);
        }
        let evicted = inner.items.len() >= self.capacity;
        if evicted {
            inner.items.pop_back();
        }
        inner.items.push_front(chunk);
        Ok(evicted)
    }

    /// Takes the most recently admitted chunk.
    pub fn pop(&self) -> Option<String> {
        self.lock().items.pop_front()
    }

    /// Refuses further chunks and drops the ones still pending.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.items.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::{OutboundQueue, QueueClosed};

    #[test]
    fn keeps_only_the_most_recent_items() {
        let queue = OutboundQueue::new(500);
        for n in 0..600 {
            queue.push(n.to_string()).unwrap();
        }
        assert_eq!(queue.len(), 500);

        let drained: Vec<String> = std::iter::from_fn(|| queue.pop()).collect();
        let expected: Vec<String> = (100..600).rev().map(|n| n.to_string()).collect();
        assert_eq!(drained, expected);
    }

    #[test]
    fn pop_returns_newest_first() {
        let queue = OutboundQueue::new(3);
        queue.push("a".to_owned()).unwrap();
        queue.push("b".to_owned()).unwrap();
        assert_eq!(queue.pop().as_deref(), Some("b"));
        queue.push("c".to_owned()).unwrap();
        assert_eq!(queue.pop().as_deref(), Some("c"));
        assert_eq!(queue.pop().as_deref(), Some("a"));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn push_reports_eviction() {
        let queue = OutboundQueue::new(1);
        assert_eq!(queue.push("first".to_owned()), Ok(false));
        assert_eq!(queue.push("second".to_owned()), Ok(true));
        assert_eq!(queue.pop().as_deref(), Some("second"));
    }

    #[test]
    fn zero_capacity_drops_everything() {
        let queue = OutboundQueue::new(0);
        assert_eq!(queue.push("lost".to_owned()), Ok(true));
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(OutboundQueue::new(64));
        let producers: Vec<_> = (0..4)
            .map(|id| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for n in 0..100 {
                        queue.push(format!("{id}-{n}")).unwrap();
                        assert!(queue.len() <= 64);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer must not panic");
        }
        assert_eq!(queue.len(), 64);
        assert_eq!(queue.capacity(), 64);
    }

    #[test]
    fn closed_queue_refuses_chunks_and_drops_pending() {
        let queue = OutboundQueue::new(4);
        queue.push("pending".to_owned()).unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert_eq!(queue.push("late".to_owned()), Err(QueueClosed));
        assert_eq!(queue.pop(), None);
    }
}
