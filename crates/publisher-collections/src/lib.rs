//! Thread-safe collections for the publisher pipeline.
//!
//! The producer and consumer threads of the publisher talk to each other
//! only through [`SyncQueue`], a bounded queue with blocking and timed
//! dequeue and an optional evict-oldest enqueue policy.

mod queue;

pub use queue::{EnqueueError, SyncQueue, Timeout};

/// Default queue capacity used by the publisher.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;
