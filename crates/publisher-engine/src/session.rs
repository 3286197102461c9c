//! Consumer-side publishing state.

use std::time::Instant;

use bytes::Bytes;
use publisher_media::{
    build_metadata, build_nalu, build_sequence_header, decode_sps, NalUnit, NalUnitType,
    RtmpPacket, SpsInfo,
};
use publisher_transport::TransportSession;
use tracing::{debug, info, trace};

use crate::metrics::PipelineMetrics;
use crate::state::PublisherState;
use crate::PipelineResult;

/// Everything the consumer knows about the stream it is publishing.
///
/// Owned and mutated by the consumer thread only.
#[derive(Debug)]
pub struct PublisherSession {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    info: SpsInfo,
    state: PublisherState,
    start: Instant,
    last_timestamp: u32,
}

impl Default for PublisherSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PublisherSession {
    /// Frame timestamps are measured from this call.
    pub fn new() -> Self {
        Self {
            sps: None,
            pps: None,
            info: SpsInfo::default(),
            state: PublisherState::AwaitingParams,
            start: Instant::now(),
            last_timestamp: 0,
        }
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    /// Parameters from the decoded SPS, all zero until one arrived.
    pub fn info(&self) -> SpsInfo {
        self.info
    }

    pub fn has_parameter_sets(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    /// Enter the terminal state.
    pub fn stop(&mut self) {
        if !self.state.is_stopped() {
            debug!(from = self.state.name(), "Publisher stopped");
        }
        self.state = PublisherState::Stopped;
    }

    /// Handle one NAL unit taken off the queue.
    ///
    /// Decode and transport failures are returned to the caller and end
    /// the run. Units arriving after the session stopped are ignored.
    pub fn process<T: TransportSession + ?Sized>(
        &mut self,
        unit: NalUnit,
        transport: &mut T,
        metrics: &PipelineMetrics,
    ) -> PipelineResult<()> {
        if self.state.is_stopped() {
            trace!(nal_type = ?unit.nal_type(), "Ignoring unit after stop");
            return Ok(());
        }

        match unit.nal_type() {
            NalUnitType::Sps if self.state.has_sent_header() => {
                trace!("Ignoring repeated SPS");
            }
            NalUnitType::Pps if self.state.has_sent_header() => {
                trace!("Ignoring repeated PPS");
            }
            NalUnitType::Sps => {
                let info = decode_sps(unit.payload())?;
                info!(
                    width = info.width,
                    height = info.height,
                    frame_rate = info.frame_rate,
                    "SPS decoded"
                );
                self.info = info;
                self.sps = Some(unit.into_payload());
                self.send_header_once(transport, metrics)?;
            }
            NalUnitType::Pps => {
                debug!(len = unit.size(), "PPS received");
                self.pps = Some(unit.into_payload());
                self.send_header_once(transport, metrics)?;
            }
            NalUnitType::EndOfStream => {
                info!("End of stream detected");
                self.stop();
            }
            nal_type if !self.state.has_sent_header() => {
                metrics.record_discarded();
                trace!(?nal_type, "Discarding unit before parameter sets");
            }
            nal_type => {
                let timestamp = self.next_timestamp();
                let packet = build_nalu(&unit, timestamp)?;
                send(transport, packet, metrics)?;
                if !self.state.is_streaming() {
                    info!(?nal_type, timestamp, "First frame sent");
                }
                self.state = PublisherState::Streaming;
            }
        }
        Ok(())
    }

    /// Send metadata and the sequence header once both parameter sets are
    /// held.
    fn send_header_once<T: TransportSession + ?Sized>(
        &mut self,
        transport: &mut T,
        metrics: &PipelineMetrics,
    ) -> PipelineResult<()> {
        if self.state.has_sent_header() {
            return Ok(());
        }
        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return Ok(());
        };

        let header = build_sequence_header(sps, pps)?;
        send(transport, build_metadata(&self.info), metrics)?;
        send(transport, header, metrics)?;

        self.state = PublisherState::HeaderSent;
        info!("Sent metadata and AVC sequence header");
        Ok(())
    }

    /// Milliseconds since the session started, never below the previous
    /// timestamp.
    fn next_timestamp(&mut self) -> u32 {
        let elapsed = u32::try_from(self.start.elapsed().as_millis()).unwrap_or(u32::MAX);
        self.last_timestamp = self.last_timestamp.max(elapsed);
        self.last_timestamp
    }
}

fn send<T: TransportSession + ?Sized>(
    transport: &mut T,
    packet: RtmpPacket,
    metrics: &PipelineMetrics,
) -> PipelineResult<()> {
    let len = packet.len();
    transport.send(packet)?;
    metrics.record_packet_sent(len);
    Ok(())
}
