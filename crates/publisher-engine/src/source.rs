//! Byte sources feeding the producer.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use publisher_collections::{SyncQueue, Timeout};
use tracing::{debug, info, trace};

use crate::config::PipelineConfig;
use crate::pipeline::StopHandle;
use crate::PipelineResult;

/// Supplies raw Annex-B bytes in arbitrary chunks.
pub trait ChunkSource: Send {
    /// Next chunk, or `None` once the source is exhausted or `stop` was
    /// triggered. May block, but must observe `stop` within a bounded time.
    fn next_chunk(&mut self, stop: &StopHandle) -> PipelineResult<Option<Bytes>>;
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    fn next_chunk(&mut self, stop: &StopHandle) -> PipelineResult<Option<Bytes>> {
        (**self).next_chunk(stop)
    }
}

/// Reads fixed-size chunks from a reader, optionally paced in real time.
pub struct FileSource<R> {
    reader: R,
    chunk_size: usize,
    interval: Duration,
    chunks_read: u64,
}

impl FileSource<File> {
    /// Open a file with the chunk size and pacing from `config`.
    pub fn open(path: impl AsRef<Path>, config: &PipelineConfig) -> PipelineResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!(
            path = %path.display(),
            chunk_size = config.chunk_size,
            interval_ms = config.chunk_interval_ms,
            "Opened file source"
        );
        Ok(Self::new(file, config.chunk_size, config.chunk_interval()))
    }
}

impl<R: Read + Send> FileSource<R> {
    /// `interval` is slept between consecutive chunks.
    pub fn new(reader: R, chunk_size: usize, interval: Duration) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            interval,
            chunks_read: 0,
        }
    }

    pub fn chunks_read(&self) -> u64 {
        self.chunks_read
    }

    fn fill_chunk(&mut self) -> PipelineResult<Option<Bytes>> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;

        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(Bytes::from(buf)))
    }
}

impl<R: Read + Send> ChunkSource for FileSource<R> {
    fn next_chunk(&mut self, stop: &StopHandle) -> PipelineResult<Option<Bytes>> {
        if self.chunks_read > 0 && !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
        if stop.is_stopped() {
            return Ok(None);
        }

        let chunk = self.fill_chunk()?;
        match &chunk {
            Some(bytes) => {
                self.chunks_read += 1;
                trace!(len = bytes.len(), chunk = self.chunks_read, "Read chunk");
            }
            None => debug!(chunks = self.chunks_read, "File source exhausted"),
        }
        Ok(chunk)
    }
}

/// Source fed by an external encoder through a [`PushHandle`].
///
/// Pushed buffers wait in their own bounded queue. When it is full the
/// oldest buffer is dropped so the encoder never blocks.
pub struct PushSource {
    buffers: Arc<SyncQueue<Bytes>>,
    poll_interval: Duration,
}

/// Producer side of a [`PushSource`].
#[derive(Clone)]
pub struct PushHandle {
    buffers: Arc<SyncQueue<Bytes>>,
}

impl PushSource {
    pub fn new(capacity: usize, poll_interval: Duration) -> (Self, PushHandle) {
        let buffers = Arc::new(SyncQueue::new(capacity, true));
        let handle = PushHandle {
            buffers: Arc::clone(&buffers),
        };
        (
            Self {
                buffers,
                poll_interval,
            },
            handle,
        )
    }

    /// Source sized by `push_queue_capacity` and polled at `poll_interval_ms`.
    pub fn from_config(config: &PipelineConfig) -> (Self, PushHandle) {
        Self::new(config.push_queue_capacity, config.poll_interval())
    }
}

impl ChunkSource for PushSource {
    fn next_chunk(&mut self, stop: &StopHandle) -> PipelineResult<Option<Bytes>> {
        let timeout = Timeout::After(self.poll_interval);
        while !stop.is_stopped() {
            if let Some(chunk) = self.buffers.dequeue(timeout) {
                return Ok(Some(chunk));
            }
            if self.buffers.is_closed() && self.buffers.is_empty() {
                debug!(
                    dropped = self.buffers.evictions(),
                    "Push source closed and drained"
                );
                return Ok(None);
            }
        }
        Ok(None)
    }
}

impl PushHandle {
    /// Copy `data` into the source.
    ///
    /// Returns `false` when `data` is empty or the source was closed.
    pub fn push(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }

        match self
            .buffers
            .enqueue(Bytes::copy_from_slice(data), Timeout::Infinite)
        {
            Ok(None) => true,
            Ok(Some(dropped)) => {
                debug!(len = dropped.len(), "Push buffer full, dropped oldest");
                true
            }
            Err(_) => false,
        }
    }

    /// Signal that no more data will be pushed. Buffers already queued are
    /// still delivered.
    pub fn close(&self) {
        self.buffers.close();
    }

    pub fn is_closed(&self) -> bool {
        self.buffers.is_closed()
    }

    /// Buffers dropped because the source fell behind.
    pub fn dropped(&self) -> u64 {
        self.buffers.evictions()
    }

    /// Buffers waiting to be read.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}
