//! H.264 elementary stream handling for the publisher.
//!
//! This crate turns raw Annex-B bytes into discrete NAL units, decodes the
//! picture dimensions and frame rate from a Sequence Parameter Set, and
//! builds the AMF0 metadata and FLV video tag bodies that RTMP carries.
//! It performs no I/O.

pub mod amf;
pub mod bits;
mod error;
pub mod nal;
pub mod packet;
pub mod sps;

pub use error::{PacketError, SpsError};
pub use nal::{parse_annex_b, AnnexBSplitter, NalUnit, NalUnitType, NalUnits};
pub use packet::{
    build_avc_decoder_config, build_metadata, build_nalu, build_sequence_header, PacketType,
    RtmpPacket,
};
pub use sps::{decode_sps, remove_emulation_prevention, SpsInfo};

/// FLV codec id for AVC (H.264).
pub const AVC_CODEC_ID: u8 = 7;
