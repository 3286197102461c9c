//! FLV file session.
//!
//! Writes the same tag bodies an RTMP connection would carry into an FLV
//! container:
//!
//! ```text
//! header:  "FLV" | version 1 | flags 0x01 (video) | u32 header size 9
//!          u32 PreviousTagSize0 = 0
//! tag:     u8 type | u24 data size | u24 timestamp | u8 timestamp ext
//!          u24 stream id 0 | body | u32 previous tag size (11 + data size)
//! ```

use std::io::Write;

use bytes::{BufMut, BytesMut};
use publisher_media::RtmpPacket;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::session::{SessionStats, TransportSession};
use crate::TransportResult;

const FLV_SIGNATURE: &[u8; 3] = b"FLV";
const FLV_VERSION: u8 = 0x01;
const FLV_FLAG_VIDEO: u8 = 0x01;
const FLV_HEADER_SIZE: u32 = 9;
const TAG_HEADER_SIZE: usize = 11;
const MAX_TAG_DATA_SIZE: usize = 0x00FF_FFFF;

/// Session that appends every packet as an FLV tag to a writer.
pub struct FlvFileSession<W: Write> {
    writer: W,
    header_written: bool,
    stats: SessionStats,
}

impl<W: Write> FlvFileSession<W> {
    /// The file header is written with the first packet.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
            stats: SessionStats::default(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn flush(&mut self) -> TransportResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the writer, writing the file header if nothing was
    /// sent so the output is still a valid FLV file.
    pub fn into_inner(mut self) -> TransportResult<W> {
        self.write_header_once()?;
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_header_once(&mut self) -> TransportResult<()> {
        if self.header_written {
            return Ok(());
        }

        let mut header = BytesMut::with_capacity(FLV_HEADER_SIZE as usize + 4);
        header.put_slice(FLV_SIGNATURE);
        header.put_u8(FLV_VERSION);
        header.put_u8(FLV_FLAG_VIDEO);
        header.put_u32(FLV_HEADER_SIZE);
        header.put_u32(0);
        self.writer.write_all(&header)?;

        self.header_written = true;
        debug!("Wrote FLV header");
        Ok(())
    }
}

impl<W: Write> TransportSession for FlvFileSession<W> {
    fn send(&mut self, packet: RtmpPacket) -> TransportResult<()> {
        let data_size = packet.len();
        if data_size > MAX_TAG_DATA_SIZE {
            self.stats.packets_dropped += 1;
            return Err(TransportError::PacketTooLarge(data_size));
        }

        self.write_header_once()?;

        let timestamp = packet.timestamp();
        let mut tag = BytesMut::with_capacity(TAG_HEADER_SIZE + data_size + 4);
        tag.put_u8(packet.packet_type().message_type_id());
        tag.put_uint(data_size as u64, 3);
        tag.put_uint(u64::from(timestamp & 0x00FF_FFFF), 3);
        tag.put_u8((timestamp >> 24) as u8);
        tag.put_uint(0, 3);
        tag.put_slice(packet.body());
        tag.put_u32((TAG_HEADER_SIZE + data_size) as u32);
        self.writer.write_all(&tag)?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += tag.len() as u64;
        trace!(
            tag_type = packet.packet_type().name(),
            data_size,
            timestamp,
            "Wrote FLV tag"
        );
        Ok(())
    }
}
