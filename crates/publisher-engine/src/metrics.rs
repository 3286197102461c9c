//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Counters shared by the producer and consumer threads.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    start_time: RwLock<Option<Instant>>,
    chunks_read: AtomicU64,
    bytes_read: AtomicU64,
    units_produced: AtomicU64,
    units_evicted: AtomicU64,
    units_consumed: AtomicU64,
    units_discarded: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub chunks_read: u64,
    pub bytes_read: u64,
    pub units_produced: u64,
    pub units_evicted: u64,
    pub units_consumed: u64,
    pub units_discarded: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub uptime: Duration,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a run.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Record a chunk read from the source.
    pub fn record_chunk(&self, len: usize) {
        self.chunks_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Record a unit handed to the queue.
    pub fn record_produced(&self) {
        self.units_produced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a unit dropped from the queue to make room.
    pub fn record_eviction(&self) {
        self.units_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a unit taken off the queue.
    pub fn record_consumed(&self) {
        self.units_consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame dropped because the parameter sets were missing.
    pub fn record_discarded(&self) {
        self.units_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet accepted by the transport.
    pub fn record_packet_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn units_evicted(&self) -> u64 {
        self.units_evicted.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let start_time = *self.start_time.read();
        let uptime = start_time
            .map(|start| start.elapsed())
            .unwrap_or_default();

        MetricsSnapshot {
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            units_produced: self.units_produced.load(Ordering::Relaxed),
            units_evicted: self.units_evicted.load(Ordering::Relaxed),
            units_consumed: self.units_consumed.load(Ordering::Relaxed),
            units_discarded: self.units_discarded.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            uptime,
        }
    }
}
