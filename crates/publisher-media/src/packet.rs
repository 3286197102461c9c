//! RTMP message bodies for an AVC video stream.
//!
//! Three kinds of packets are produced, in this order on the wire:
//! - `onMetaData` script data with the picture size and frame rate,
//! - one AVC sequence header carrying the decoder configuration record,
//! - one AVC NALU packet per coded NAL unit.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::amf::ScriptDataEncoder;
use crate::error::PacketError;
use crate::nal::NalUnit;
use crate::sps::SpsInfo;
use crate::AVC_CODEC_ID;

/// FLV frame type nibble for key frames.
const FRAME_TYPE_KEY: u8 = 0x10;
/// FLV frame type nibble for inter frames.
const FRAME_TYPE_INTER: u8 = 0x20;

/// RTMP message kind of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// AMF0 script data (`onMetaData`).
    Metadata,
    /// FLV video tag body.
    Video,
}

impl PacketType {
    /// RTMP message type id, which is also the FLV tag type.
    pub fn message_type_id(&self) -> u8 {
        match self {
            PacketType::Metadata => 18,
            PacketType::Video => 9,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            PacketType::Metadata => "metadata",
            PacketType::Video => "video",
        }
    }
}

/// AVC packet subtype, the second byte of an AVC video tag body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum AvcPacketType {
    SequenceHeader = 0,
    Nalu = 1,
}

/// A message body ready to hand to a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpPacket {
    body: Bytes,
    packet_type: PacketType,
    timestamp: u32,
}

impl RtmpPacket {
    /// Create a packet from an already encoded body.
    pub fn new(body: Bytes, packet_type: PacketType, timestamp: u32) -> Self {
        Self {
            body,
            packet_type,
            timestamp,
        }
    }

    /// The FLV tag body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Milliseconds since the start of the stream.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn is_video(&self) -> bool {
        self.packet_type == PacketType::Video
    }

    /// True for video tags flagged as key frames, sequence header included.
    pub fn is_keyframe(&self) -> bool {
        self.is_video() && self.body.first().map_or(false, |b| b & 0xF0 == FRAME_TYPE_KEY)
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Build the `onMetaData` script data message.
///
/// Properties are `width`, `height`, `framerate` and `videocodecid`, each
/// an AMF0 number.
pub fn build_metadata(info: &SpsInfo) -> RtmpPacket {
    let mut encoder = ScriptDataEncoder::new();
    encoder
        .put_string("onMetaData")
        .begin_object()
        .put_number_property("width", f64::from(info.width))
        .put_number_property("height", f64::from(info.height))
        .put_number_property("framerate", f64::from(info.frame_rate))
        .put_number_property("videocodecid", f64::from(AVC_CODEC_ID))
        .end_object();

    let body = encoder.finish();
    debug!(
        width = info.width,
        height = info.height,
        frame_rate = info.frame_rate,
        len = body.len(),
        "Built metadata packet"
    );
    RtmpPacket::new(body, PacketType::Metadata, 0)
}

/// Build an AVCDecoderConfigurationRecord from raw SPS and PPS payloads.
///
/// Profile, compatibility and level are copied from SPS bytes 1 to 3.
/// NAL units are announced with a 4-byte length prefix.
pub fn build_avc_decoder_config(sps: &[u8], pps: &[u8]) -> Result<Bytes, PacketError> {
    if sps.len() < 4 {
        return Err(PacketError::SpsTooShort(sps.len()));
    }
    check_parameter_set_len("SPS", sps)?;
    check_parameter_set_len("PPS", pps)?;

    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());

    // configurationVersion
    buf.put_u8(0x01);

    // AVCProfileIndication, profile_compatibility, AVCLevelIndication
    buf.put_slice(&sps[1..4]);

    // lengthSizeMinusOne = 3, reserved bits set
    buf.put_u8(0xFF);

    // numOfSequenceParameterSets = 1, reserved bits set
    buf.put_u8(0xE1);
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);

    // numOfPictureParameterSets
    buf.put_u8(0x01);
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);

    debug!(
        sps_len = sps.len(),
        pps_len = pps.len(),
        total_len = buf.len(),
        "Built AVC decoder configuration record"
    );
    Ok(buf.freeze())
}

/// Build the AVC sequence header video packet.
pub fn build_sequence_header(sps: &[u8], pps: &[u8]) -> Result<RtmpPacket, PacketError> {
    let config = build_avc_decoder_config(sps, pps)?;
    let body = video_tag(true, AvcPacketType::SequenceHeader, &config);
    Ok(RtmpPacket::new(body, PacketType::Video, 0))
}

/// Build an AVC NALU video packet with a 4-byte length prefix.
pub fn build_nalu(nal: &NalUnit, timestamp: u32) -> Result<RtmpPacket, PacketError> {
    let payload = nal.payload();
    if payload.is_empty() {
        return Err(PacketError::EmptyNalUnit);
    }

    let mut data = BytesMut::with_capacity(4 + payload.len());
    data.put_u32(nal.size());
    data.put_slice(payload);

    let body = video_tag(nal.is_keyframe(), AvcPacketType::Nalu, &data);
    Ok(RtmpPacket::new(body, PacketType::Video, timestamp))
}

fn check_parameter_set_len(kind: &'static str, data: &[u8]) -> Result<(), PacketError> {
    if data.len() > u16::MAX as usize {
        return Err(PacketError::ParameterSetTooLong {
            kind,
            len: data.len(),
        });
    }
    Ok(())
}

/// Frame type and codec id, AVC packet type and a zero composition time,
/// followed by `data`.
fn video_tag(keyframe: bool, avc_packet_type: AvcPacketType, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + data.len());

    let frame_type = if keyframe {
        FRAME_TYPE_KEY
    } else {
        FRAME_TYPE_INTER
    };
    buf.put_u8(frame_type | AVC_CODEC_ID);
    buf.put_u8(avc_packet_type as u8);

    // Composition time offset, always zero without B-frame reordering
    buf.put_slice(&[0x00, 0x00, 0x00]);

    buf.put_slice(data);
    buf.freeze()
}
