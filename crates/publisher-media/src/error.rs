//! Error types for the media module.

use thiserror::Error;

/// Errors raised while decoding a Sequence Parameter Set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpsError {
    /// The decoder needed more bits than the payload holds.
    #[error("Malformed SPS bitstream: no bits left at bit {position} of {bit_len} ({stage})")]
    MalformedBitstream {
        /// Syntax stage being decoded when the bits ran out.
        stage: &'static str,
        /// Bit cursor at the point of failure.
        position: usize,
        /// Total number of bits in the unescaped payload.
        bit_len: usize,
    },

    /// A field decoded to a value the stream cannot carry.
    #[error("Malformed SPS bitstream: {0}")]
    InvalidValue(&'static str),
}

/// Errors raised while building RTMP packet bodies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
    /// SPS too short to carry profile and level bytes.
    #[error("SPS too short: {0} bytes")]
    SpsTooShort(usize),

    /// Parameter set does not fit a 16-bit length field.
    #[error("{kind} too long: {len} bytes")]
    ParameterSetTooLong { kind: &'static str, len: usize },

    /// NAL unit without payload.
    #[error("Empty NAL unit")]
    EmptyNalUnit,
}
