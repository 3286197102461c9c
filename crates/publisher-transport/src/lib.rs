//! Transport sessions for the AVC publisher.
//!
//! A session is the opaque sink packets are handed to once they are fully
//! built. Connection setup and the RTMP handshake happen elsewhere; this
//! crate only defines the seam and two sinks: a channel into a connected
//! client and an FLV file writer.

mod error;
mod flv;
mod session;

pub use error::TransportError;
pub use flv::FlvFileSession;
pub use session::{ChannelSession, SessionStats, TransportSession};

/// Channel capacity for outgoing packets.
pub const PACKET_CHANNEL_CAPACITY: usize = 30;

/// How long a channel send waits for room before failing.
pub const SEND_TIMEOUT_MS: u64 = 1000;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
