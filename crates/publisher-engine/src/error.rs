//! Error types for the pipeline.

use publisher_media::{PacketError, SpsError};
use publisher_transport::TransportError;
use thiserror::Error;

/// Errors that end a publishing run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The SPS could not be decoded.
    #[error("SPS decode failed: {0}")]
    Sps(#[from] SpsError),

    /// A packet could not be built.
    #[error("Packet build failed: {0}")]
    Packet(#[from] PacketError),

    /// The transport session rejected a packet.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Reading the source failed.
    #[error("Source read failed: {0}")]
    Source(#[from] std::io::Error),

    /// The producer thread could not be started.
    #[error("Failed to spawn producer thread: {0}")]
    Spawn(std::io::Error),

    /// The producer thread panicked.
    #[error("Producer thread panicked")]
    ProducerPanicked,

    /// Invalid pipeline configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be read.
    #[error("Config read failed: {0}")]
    ConfigRead(std::io::Error),

    /// The configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
