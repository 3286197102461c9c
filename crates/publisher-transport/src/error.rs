//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur while handing packets to a session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Send failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Channel disconnected.
    #[error("Channel disconnected")]
    ChannelDisconnected,

    /// Packet does not fit an FLV tag.
    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
