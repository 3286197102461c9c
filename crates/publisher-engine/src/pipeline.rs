//! Producer/consumer publishing pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use publisher_collections::{EnqueueError, SyncQueue, Timeout};
use publisher_media::{AnnexBSplitter, NalUnit};
use publisher_transport::TransportSession;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::metrics::PipelineMetrics;
use crate::session::PublisherSession;
use crate::source::ChunkSource;
use crate::state::{PublisherState, StopReason};
use crate::{PipelineResult, STATS_LOG_INTERVAL_SECS};

/// Cooperative stop flag shared by both pipeline threads.
///
/// Checked at loop boundaries only, so a stop takes effect within one poll
/// interval.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    should_stop: Arc<AtomicBool>,
}

impl StopHandle {
    /// Create a handle that is not yet stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask both pipeline threads to stop.
    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub final_state: PublisherState,
    pub stop_reason: StopReason,
    pub units_consumed: u64,
    pub packets_sent: u64,
    pub units_evicted: u64,
    pub units_discarded: u64,
}

/// Runs one stream from a [`ChunkSource`] into a [`TransportSession`].
///
/// A publisher is single use: [`Publisher::run`] consumes it, so the stop
/// flag and counters always start fresh.
pub struct Publisher {
    config: PipelineConfig,
    stop: StopHandle,
    metrics: Arc<PipelineMetrics>,
}

impl Publisher {
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stop: StopHandle::new(),
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    /// Validated configuration for this run.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle for stopping the run from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Counters shared with the running pipeline.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Publish until end of stream, source exhaustion, stop or failure.
    ///
    /// The producer runs on a spawned thread, the consumer on the calling
    /// thread. Both are finished when this returns.
    #[instrument(name = "publish", skip_all, fields(queue_capacity = self.config.queue_capacity))]
    pub fn run<S, T>(self, source: S, transport: &mut T) -> PipelineResult<PublishReport>
    where
        S: ChunkSource + 'static,
        T: TransportSession + ?Sized,
    {
        info!("Publisher starting");
        self.metrics.start();

        let queue = Arc::new(SyncQueue::new(self.config.queue_capacity, true));
        let producer = {
            let queue = Arc::clone(&queue);
            let stop = self.stop.clone();
            let metrics = Arc::clone(&self.metrics);
            thread::Builder::new()
                .name("nal-producer".to_string())
                .spawn(move || producer_loop(source, queue, stop, metrics))
                .map_err(PipelineError::Spawn)?
        };

        let mut session = PublisherSession::new();
        let consumed = consumer_loop(
            &queue,
            &mut session,
            transport,
            &self.stop,
            &self.metrics,
            self.config.poll_interval(),
        );
        session.stop();

        // Release the producer whatever the consumer's outcome.
        self.stop.stop();
        queue.close();
        let produced = producer
            .join()
            .map_err(|_| PipelineError::ProducerPanicked)?;

        let stop_reason = match consumed {
            Ok(reason) => reason,
            Err(e) => {
                error!(error = %e, "Publisher failed");
                return Err(e);
            }
        };
        if let Err(e) = produced {
            error!(error = %e, "Producer failed");
            return Err(e);
        }

        let snapshot = self.metrics.snapshot();
        let report = PublishReport {
            final_state: session.state(),
            stop_reason,
            units_consumed: snapshot.units_consumed,
            packets_sent: snapshot.packets_sent,
            units_evicted: snapshot.units_evicted,
            units_discarded: snapshot.units_discarded,
        };
        info!(
            reason = stop_reason.name(),
            units_consumed = report.units_consumed,
            packets_sent = report.packets_sent,
            units_evicted = report.units_evicted,
            "Publisher finished"
        );
        Ok(report)
    }
}

/// Read chunks, split them into NAL units and enqueue them.
///
/// The unit queue is closed on return so the consumer can tell a finished
/// source from a slow one.
#[instrument(name = "producer_loop", skip_all)]
fn producer_loop<S: ChunkSource>(
    mut source: S,
    queue: Arc<SyncQueue<NalUnit>>,
    stop: StopHandle,
    metrics: Arc<PipelineMetrics>,
) -> PipelineResult<()> {
    debug!("Producer starting");
    let result = produce(&mut source, &queue, &stop, &metrics);
    queue.close();

    match &result {
        Ok(()) => debug!(chunks = metrics.snapshot().chunks_read, "Producer finished"),
        Err(e) => warn!(error = %e, "Producer stopped on error"),
    }
    result
}

fn produce<S: ChunkSource>(
    source: &mut S,
    queue: &SyncQueue<NalUnit>,
    stop: &StopHandle,
    metrics: &PipelineMetrics,
) -> PipelineResult<()> {
    let mut splitter = AnnexBSplitter::new();

    while !stop.is_stopped() {
        let Some(chunk) = source.next_chunk(stop)? else {
            if stop.is_stopped() {
                break;
            }
            // Only a source that ran dry gets its trailing unit flushed.
            for unit in splitter.finish() {
                enqueue(queue, unit, metrics);
            }
            info!(
                chunks = metrics.snapshot().chunks_read,
                "Source exhausted"
            );
            return Ok(());
        };

        metrics.record_chunk(chunk.len());
        for unit in splitter.feed(&chunk) {
            enqueue(queue, unit, metrics);
        }
    }

    debug!(carried = splitter.carried_len(), "Producer stop requested");
    Ok(())
}

fn enqueue(queue: &SyncQueue<NalUnit>, unit: NalUnit, metrics: &PipelineMetrics) {
    metrics.record_produced();
    match queue.enqueue(unit, Timeout::Infinite) {
        Ok(None) => {}
        Ok(Some(evicted)) => {
            metrics.record_eviction();
            trace!(nal_type = ?evicted.nal_type(), "Queue full, evicted oldest unit");
        }
        Err(EnqueueError::Closed(unit)) | Err(EnqueueError::Full(unit)) => {
            trace!(nal_type = ?unit.nal_type(), "Queue closed, unit dropped");
        }
    }
}

/// Drain the unit queue into the session until a terminal condition.
#[instrument(name = "consumer_loop", skip_all)]
fn consumer_loop<T: TransportSession + ?Sized>(
    queue: &SyncQueue<NalUnit>,
    session: &mut PublisherSession,
    transport: &mut T,
    stop: &StopHandle,
    metrics: &PipelineMetrics,
    poll_interval: Duration,
) -> PipelineResult<StopReason> {
    let timeout = Timeout::After(poll_interval);
    let stats_interval = Duration::from_secs(STATS_LOG_INTERVAL_SECS);
    let mut last_log_time = Instant::now();

    loop {
        if stop.is_stopped() {
            info!("Stop requested");
            return Ok(StopReason::StopRequested);
        }

        if last_log_time.elapsed() >= stats_interval {
            let snapshot = metrics.snapshot();
            info!(
                consumed = snapshot.units_consumed,
                sent = snapshot.packets_sent,
                evicted = snapshot.units_evicted,
                queued = queue.len(),
                state = session.state().name(),
                "Publisher stats"
            );
            last_log_time = Instant::now();
        }

        match queue.dequeue(timeout) {
            Some(unit) => {
                metrics.record_consumed();
                session.process(unit, transport, metrics)?;
                if session.state().is_stopped() {
                    return Ok(StopReason::EndOfStream);
                }
            }
            None if queue.is_closed() && queue.is_empty() => {
                info!("Unit queue drained");
                return Ok(StopReason::SourceExhausted);
            }
            None => trace!("No unit within poll interval"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use bytes::Bytes;
    use publisher_media::{PacketType, RtmpPacket};
    use publisher_transport::{ChannelSession, TransportError, TransportResult};

    const SPS: &[u8] = &[
        0x67, 0x64, 0x00, 0x1f, 0xac, 0xd9, 0x40, 0x50, 0x05, 0xba, 0x10, 0x00, 0x00, 0x03, 0x00,
        0x10, 0x00, 0x00, 0x03, 0x03, 0xc8, 0x40,
    ];
    const PPS: &[u8] = &[0x68, 0xeb, 0xe3, 0xcb, 0x22, 0xc0];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x33, 0xff];
    const P_SLICE: &[u8] = &[0x41, 0x9a, 0x02, 0x04];
    const EOS: &[u8] = &[0x0b];

    /// Hands out pre-cut chunks, then reports exhaustion.
    struct VecSource {
        chunks: VecDeque<Bytes>,
        served: usize,
        pause_after_first: Duration,
    }

    impl VecSource {
        fn new(stream: &[u8], chunk_size: usize) -> Self {
            Self {
                chunks: stream
                    .chunks(chunk_size)
                    .map(Bytes::copy_from_slice)
                    .collect(),
                served: 0,
                pause_after_first: Duration::ZERO,
            }
        }

        /// Two chunks split at `at`, with a pause before the second.
        fn split_with_pause(stream: &[u8], at: usize, pause: Duration) -> Self {
            Self {
                chunks: VecDeque::from(vec![
                    Bytes::copy_from_slice(&stream[..at]),
                    Bytes::copy_from_slice(&stream[at..]),
                ]),
                served: 0,
                pause_after_first: pause,
            }
        }
    }

    impl ChunkSource for VecSource {
        fn next_chunk(&mut self, _stop: &StopHandle) -> PipelineResult<Option<Bytes>> {
            if self.served == 1 && !self.pause_after_first.is_zero() {
                thread::sleep(self.pause_after_first);
            }
            self.served += 1;
            Ok(self.chunks.pop_front())
        }
    }

    /// Never yields data; returns only once stopped.
    struct IdleSource;

    impl ChunkSource for IdleSource {
        fn next_chunk(&mut self, stop: &StopHandle) -> PipelineResult<Option<Bytes>> {
            while !stop.is_stopped() {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(None)
        }
    }

    struct FailingSource;

    impl ChunkSource for FailingSource {
        fn next_chunk(&mut self, _stop: &StopHandle) -> PipelineResult<Option<Bytes>> {
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "device gone").into())
        }
    }

    #[derive(Default)]
    struct Recorder {
        packets: Vec<RtmpPacket>,
        fail_after: Option<usize>,
        delay: Duration,
    }

    impl TransportSession for Recorder {
        fn send(&mut self, packet: RtmpPacket) -> TransportResult<()> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if self.fail_after == Some(self.packets.len()) {
                return Err(TransportError::SendFailed("peer closed".to_string()));
            }
            self.packets.push(packet);
            Ok(())
        }
    }

    fn annex_b(units: &[&[u8]]) -> Vec<u8> {
        let mut stream = Vec::new();
        for unit in units {
            stream.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            stream.extend_from_slice(unit);
        }
        stream
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            poll_interval_ms: 50,
            chunk_interval_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_sequence() {
        let stream = annex_b(&[SPS, PPS, IDR, P_SLICE, EOS, IDR]);
        let publisher = Publisher::new(test_config()).unwrap();
        let mut transport = Recorder::default();

        let report = publisher.run(VecSource::new(&stream, 7), &mut transport).unwrap();

        let kinds: Vec<_> = transport
            .packets
            .iter()
            .map(|p| (p.packet_type(), p.body().first().copied(), p.body().get(1).copied()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (PacketType::Metadata, Some(0x02), Some(0x00)),
                (PacketType::Video, Some(0x17), Some(0x00)),
                (PacketType::Video, Some(0x17), Some(0x01)),
                (PacketType::Video, Some(0x27), Some(0x01)),
            ]
        );
        assert!(transport.packets[2].timestamp() <= transport.packets[3].timestamp());
        assert_eq!(&transport.packets[2].body()[9..], IDR);
        assert_eq!(&transport.packets[3].body()[9..], P_SLICE);

        assert_eq!(report.final_state, PublisherState::Stopped);
        assert_eq!(report.stop_reason, StopReason::EndOfStream);
        assert_eq!(report.packets_sent, 4);
        assert_eq!(report.units_consumed, 5);
    }

    #[test]
    fn test_source_exhaustion_flushes_trailing_unit() {
        // No end-of-stream marker: the final P slice is only terminated by
        // the end of input.
        let stream = annex_b(&[SPS, PPS, IDR, P_SLICE]);
        let publisher = Publisher::new(test_config()).unwrap();
        let mut transport = Recorder::default();

        let report = publisher.run(VecSource::new(&stream, 5), &mut transport).unwrap();

        assert_eq!(report.stop_reason, StopReason::SourceExhausted);
        assert_eq!(transport.packets.len(), 4);
        assert_eq!(&transport.packets[3].body()[9..], P_SLICE);
    }

    #[test]
    fn test_frames_before_parameter_sets_are_discarded() {
        let stream = annex_b(&[IDR, P_SLICE, SPS, PPS, IDR, EOS]);
        let publisher = Publisher::new(test_config()).unwrap();
        let mut transport = Recorder::default();

        let report = publisher.run(VecSource::new(&stream, 64), &mut transport).unwrap();

        assert_eq!(report.units_discarded, 2);
        assert_eq!(transport.packets.len(), 3);
    }

    #[test]
    fn test_malformed_sps_fails_run() {
        let stream = annex_b(&[&SPS[..6], PPS, IDR, EOS]);
        let publisher = Publisher::new(test_config()).unwrap();
        let stop = publisher.stop_handle();
        let mut transport = Recorder::default();

        let result = publisher.run(VecSource::new(&stream, 64), &mut transport);

        assert!(matches!(result, Err(PipelineError::Sps(_))));
        assert!(transport.packets.is_empty());
        assert!(stop.is_stopped());
    }

    #[test]
    fn test_transport_failure_fails_run() {
        let stream = annex_b(&[SPS, PPS, IDR, P_SLICE, EOS]);
        let publisher = Publisher::new(test_config()).unwrap();
        let mut transport = Recorder {
            fail_after: Some(2),
            ..Default::default()
        };

        let result = publisher.run(VecSource::new(&stream, 64), &mut transport);

        assert!(matches!(result, Err(PipelineError::Transport(_))));
        assert_eq!(transport.packets.len(), 2);
    }

    #[test]
    fn test_source_error_fails_run() {
        let publisher = Publisher::new(test_config()).unwrap();
        let mut transport = Recorder::default();

        let result = publisher.run(FailingSource, &mut transport);

        assert!(matches!(result, Err(PipelineError::Source(_))));
    }

    #[test]
    fn test_stop_handle_ends_idle_run() {
        let publisher = Publisher::new(test_config()).unwrap();
        let stop = publisher.stop_handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stop.stop();
        });

        let mut transport = Recorder::default();
        let started = Instant::now();
        let report = publisher.run(IdleSource, &mut transport).unwrap();
        stopper.join().unwrap();

        assert_eq!(report.stop_reason, StopReason::StopRequested);
        assert_eq!(report.final_state, PublisherState::Stopped);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(transport.packets.is_empty());
    }

    #[test]
    fn test_new_publisher_starts_fresh_after_stopped_run() {
        let stream = annex_b(&[SPS, PPS, IDR, EOS]);

        let first = Publisher::new(test_config()).unwrap();
        let first_stop = first.stop_handle();
        let mut transport = Recorder::default();
        first.run(VecSource::new(&stream, 16), &mut transport).unwrap();
        assert!(first_stop.is_stopped());

        let second = Publisher::new(test_config()).unwrap();
        assert!(!second.stop_handle().is_stopped());
        let metrics = second.metrics();
        assert_eq!(metrics.snapshot().packets_sent, 0);

        let mut transport = Recorder::default();
        let report = second.run(VecSource::new(&stream, 16), &mut transport).unwrap();
        assert_eq!(report.stop_reason, StopReason::EndOfStream);
        assert_eq!(report.packets_sent, 3);
        assert_eq!(metrics.snapshot().packets_sent, 3);
    }

    #[test]
    fn test_evictions_are_counted() {
        let mut units: Vec<&[u8]> = vec![SPS, PPS];
        units.extend(std::iter::repeat(P_SLICE).take(200));
        units.push(EOS);
        let stream = annex_b(&units);

        let config = PipelineConfig {
            queue_capacity: 4,
            ..test_config()
        };
        let publisher = Publisher::new(config).unwrap();
        let metrics = publisher.metrics();
        // A slow peer lets the producer overrun the four-slot queue.
        let mut transport = Recorder {
            delay: Duration::from_millis(50),
            ..Default::default()
        };

        // The parameter sets arrive alone, then the frames flood in. One
        // byte of the first frame is needed to terminate the PPS.
        let params_len = annex_b(&[SPS, PPS]).len() + 5;
        let source =
            VecSource::split_with_pause(&stream, params_len, Duration::from_millis(300));

        let report = publisher.run(source, &mut transport).unwrap();

        assert_eq!(report.stop_reason, StopReason::EndOfStream);
        assert_eq!(report.units_discarded, 0);
        assert!(report.units_evicted > 0);
        assert_eq!(report.units_evicted, metrics.units_evicted());
        assert_eq!(
            metrics.snapshot().units_produced,
            report.units_consumed + report.units_evicted
        );
        // Everything consumed besides SPS, PPS and EOS went out as a frame.
        assert_eq!(report.packets_sent, 2 + report.units_consumed - 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            Publisher::new(config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_channel_session_receives_packets() {
        let stream = annex_b(&[SPS, PPS, IDR, EOS]);
        let publisher = Publisher::new(test_config()).unwrap();
        let (mut transport, receiver) = ChannelSession::bounded(8);

        let drain = thread::spawn(move || {
            let mut types = Vec::new();
            while let Ok(packet) = receiver.recv_timeout(Duration::from_secs(2)) {
                types.push(packet.packet_type().message_type_id());
            }
            types
        });

        publisher
            .run(VecSource::new(&stream, 3), &mut transport)
            .unwrap();
        drop(transport);

        assert_eq!(drain.join().unwrap(), vec![18, 9, 9]);
    }
}
