//! The session seam and the channel-backed session.

use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use publisher_media::RtmpPacket;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::{TransportResult, PACKET_CHANNEL_CAPACITY, SEND_TIMEOUT_MS};

/// Sink for finished packets.
///
/// A failed send is terminal for the stream that produced the packet.
pub trait TransportSession {
    fn send(&mut self, packet: RtmpPacket) -> TransportResult<()>;
}

impl<S: TransportSession + ?Sized> TransportSession for &mut S {
    fn send(&mut self, packet: RtmpPacket) -> TransportResult<()> {
        (**self).send(packet)
    }
}

impl<S: TransportSession + ?Sized> TransportSession for Box<S> {
    fn send(&mut self, packet: RtmpPacket) -> TransportResult<()> {
        (**self).send(packet)
    }
}

/// Counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_dropped: u64,
}

/// Hands packets to a connected client through a bounded channel.
///
/// The receiving end is owned by whatever drives the connection. A full
/// channel is waited on for up to the send timeout.
pub struct ChannelSession {
    sender: Sender<RtmpPacket>,
    send_timeout: Duration,
    stats: SessionStats,
}

impl ChannelSession {
    /// Wrap an existing sender.
    pub fn new(sender: Sender<RtmpPacket>) -> Self {
        Self {
            sender,
            send_timeout: Duration::from_millis(SEND_TIMEOUT_MS),
            stats: SessionStats::default(),
        }
    }

    /// Create a session and the receiver that drains it.
    pub fn bounded(capacity: usize) -> (Self, Receiver<RtmpPacket>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        debug!(capacity, "Created packet channel");
        (Self::new(sender), receiver)
    }

    /// Channel with [`PACKET_CHANNEL_CAPACITY`] slots.
    pub fn with_default_capacity() -> (Self, Receiver<RtmpPacket>) {
        Self::bounded(PACKET_CHANNEL_CAPACITY)
    }

    /// Override how long a send may block on a full channel.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}

impl TransportSession for ChannelSession {
    fn send(&mut self, packet: RtmpPacket) -> TransportResult<()> {
        let len = packet.len() as u64;
        let timestamp = packet.timestamp();

        match self.sender.send_timeout(packet, self.send_timeout) {
            Ok(()) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += len;
                trace!(len, timestamp, "Packet queued");
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.stats.packets_dropped += 1;
                warn!(
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Packet channel full"
                );
                Err(TransportError::SendFailed(format!(
                    "channel full for {:?}",
                    self.send_timeout
                )))
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                self.stats.packets_dropped += 1;
                Err(TransportError::ChannelDisconnected)
            }
        }
    }
}
