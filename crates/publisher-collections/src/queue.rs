//! Bounded synchronized queue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;
use tracing::trace;

/// How long a queue operation may wait for its condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the condition holds.
    Infinite,

    /// Do not wait at all.
    Immediate,

    /// Wait at most this long.
    After(Duration),
}

impl Timeout {
    /// Map a millisecond timeout: negative blocks forever, zero never blocks,
    /// positive blocks up to that many milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            m if m < 0 => Self::Infinite,
            0 => Self::Immediate,
            m => Self::After(Duration::from_millis(m as u64)),
        }
    }

    fn deadline(self) -> Option<Instant> {
        match self {
            Self::After(duration) => Some(Instant::now() + duration),
            _ => None,
        }
    }
}

/// Enqueue failure. The rejected item is handed back to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError<T> {
    /// The queue stayed full for the whole timeout.
    #[error("queue is full")]
    Full(T),

    /// The queue was closed.
    #[error("queue is closed")]
    Closed(T),
}

impl<T> EnqueueError<T> {
    /// Take back the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    evictions: u64,
}

/// A bounded FIFO queue shared between threads.
///
/// All operations run under a single lock. Producers waiting for space and
/// consumers waiting for data are woken through separate condition
/// variables, and every wait re-checks its predicate.
///
/// With `evict_oldest` set, enqueueing into a full queue pops the oldest
/// element and returns it to the caller instead of blocking, so the
/// producer never stalls. The number of evicted elements is tracked and
/// exposed through [`SyncQueue::evictions`].
pub struct SyncQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    evict_oldest: bool,
}

impl<T> SyncQueue<T> {
    /// Create a queue holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, evict_oldest: bool) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");

        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                evictions: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            evict_oldest,
        }
    }

    /// Push an element at the back of the queue.
    ///
    /// Returns the evicted oldest element when the queue was full and the
    /// evict-oldest policy is enabled. Without that policy a full queue
    /// blocks according to `timeout` and fails with [`EnqueueError::Full`]
    /// once it expires.
    pub fn enqueue(&self, item: T, timeout: Timeout) -> Result<Option<T>, EnqueueError<T>> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(EnqueueError::Closed(item));
        }

        let mut evicted = None;
        if state.items.len() >= self.capacity {
            if self.evict_oldest {
                evicted = state.items.pop_front();
                state.evictions += 1;
                trace!(evictions = state.evictions, "Evicted oldest queue element");
            } else if !self.wait_for_space(&mut state, timeout) {
                return Err(if state.closed {
                    EnqueueError::Closed(item)
                } else {
                    EnqueueError::Full(item)
                });
            }
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();

        Ok(evicted)
    }

    /// Pop the element at the front of the queue, waiting according to
    /// `timeout` while the queue is empty.
    ///
    /// Returns `None` when the timeout expires, or immediately once the
    /// queue is closed and drained.
    pub fn dequeue(&self, timeout: Timeout) -> Option<T> {
        let mut state = self.state.lock();
        let deadline = timeout.deadline();

        while state.items.is_empty() {
            if state.closed {
                return None;
            }
            match timeout {
                Timeout::Immediate => return None,
                Timeout::Infinite => self.not_empty.wait(&mut state),
                Timeout::After(_) => {
                    let Some(deadline) = deadline else {
                        return None;
                    };
                    if self.not_empty.wait_until(&mut state, deadline).timed_out()
                        && state.items.is_empty()
                    {
                        return None;
                    }
                }
            }
        }

        let item = state.items.pop_front();
        drop(state);
        self.not_full.notify_one();

        item
    }

    /// Wait until the queue has room. Returns false on timeout or close.
    fn wait_for_space(&self, state: &mut MutexGuard<'_, State<T>>, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();

        while state.items.len() >= self.capacity {
            if state.closed {
                return false;
            }
            match timeout {
                Timeout::Immediate => return false,
                Timeout::Infinite => self.not_full.wait(state),
                Timeout::After(_) => {
                    let Some(deadline) = deadline else {
                        return false;
                    };
                    if self.not_full.wait_until(state, deadline).timed_out()
                        && state.items.len() >= self.capacity
                    {
                        return false;
                    }
                }
            }
        }

        !state.closed
    }

    /// Check whether the queue holds no elements.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Check whether the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.state.lock().items.len() >= self.capacity
    }

    /// Number of queued elements.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Maximum number of queued elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued element.
    pub fn clear(&self) {
        self.state.lock().items.clear();
        self.not_full.notify_all();
    }

    /// Close the queue and wake every waiter.
    ///
    /// Elements already queued can still be dequeued; new elements are
    /// rejected with [`EnqueueError::Closed`].
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Check whether [`SyncQueue::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Total number of elements dropped by the evict-oldest policy.
    pub fn evictions(&self) -> u64 {
        self.state.lock().evictions
    }
}

impl<T: Clone> SyncQueue<T> {
    /// Clone of the oldest element, if any.
    pub fn front(&self) -> Option<T> {
        self.state.lock().items.front().cloned()
    }

    /// Clone of the newest element, if any.
    pub fn back(&self) -> Option<T> {
        self.state.lock().items.back().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(Timeout::from_millis(-1), Timeout::Infinite);
        assert_eq!(Timeout::from_millis(0), Timeout::Immediate);
        assert_eq!(
            Timeout::from_millis(250),
            Timeout::After(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_fifo_order() {
        let queue = SyncQueue::new(4, false);
        for i in 0..3 {
            assert_eq!(queue.enqueue(i, Timeout::Immediate), Ok(None));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front(), Some(0));
        assert_eq!(queue.back(), Some(2));
        assert_eq!(queue.dequeue(Timeout::Immediate), Some(0));
        assert_eq!(queue.dequeue(Timeout::Immediate), Some(1));
        assert_eq!(queue.dequeue(Timeout::Immediate), Some(2));
        assert_eq!(queue.dequeue(Timeout::Immediate), None);
    }

    #[test]
    fn test_evict_oldest_keeps_most_recent() {
        let capacity = 5;
        let queue = SyncQueue::new(capacity, true);
        let mut evicted = Vec::new();

        for i in 0..12 {
            if let Some(old) = queue.enqueue(i, Timeout::Immediate).unwrap() {
                evicted.push(old);
            }
        }

        assert!(queue.is_full());
        assert_eq!(queue.evictions(), 7);
        assert_eq!(evicted, vec![0, 1, 2, 3, 4, 5, 6]);

        let remaining: Vec<_> = std::iter::from_fn(|| queue.dequeue(Timeout::Immediate)).collect();
        assert_eq!(remaining, vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_full_queue_without_eviction_fails_after_timeout() {
        let queue = SyncQueue::new(1, false);
        queue.enqueue("a", Timeout::Immediate).unwrap();

        assert_eq!(
            queue.enqueue("b", Timeout::Immediate),
            Err(EnqueueError::Full("b"))
        );

        let start = Instant::now();
        let result = queue.enqueue("c", Timeout::from_millis(50));
        assert_eq!(result.unwrap_err().into_inner(), "c");
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(queue.evictions(), 0);
    }

    #[test]
    fn test_blocked_enqueue_resumes_when_space_frees() {
        let queue = Arc::new(SyncQueue::new(1, false));
        queue.enqueue(1, Timeout::Immediate).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(2, Timeout::Infinite))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.dequeue(Timeout::Infinite), Some(1));
        assert_eq!(producer.join().unwrap(), Ok(None));
        assert_eq!(queue.dequeue(Timeout::Immediate), Some(2));
    }

    #[test]
    fn test_dequeue_timeout_waits_full_duration() {
        let queue: SyncQueue<u8> = SyncQueue::new(2, true);

        let start = Instant::now();
        assert_eq!(queue.dequeue(Timeout::from_millis(100)), None);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(SyncQueue::new(2, true));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue(Timeout::from_millis(5000)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.enqueue(42, Timeout::Immediate).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_close_drains_then_returns_none() {
        let queue = Arc::new(SyncQueue::new(3, true));
        queue.enqueue(1, Timeout::Immediate).unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(
            queue.enqueue(2, Timeout::Immediate),
            Err(EnqueueError::Closed(2))
        );
        assert_eq!(queue.dequeue(Timeout::Infinite), Some(1));
        assert_eq!(queue.dequeue(Timeout::Infinite), None);
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let queue: Arc<SyncQueue<u8>> = Arc::new(SyncQueue::new(1, false));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue(Timeout::Infinite))
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_clear() {
        let queue = SyncQueue::new(3, false);
        queue.enqueue(1, Timeout::Immediate).unwrap();
        queue.enqueue(2, Timeout::Immediate).unwrap();
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 3);
    }
}
