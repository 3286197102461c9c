//! NAL unit recovery from Annex-B byte streams.
//!
//! Encoders and files deliver H.264 as an **Annex B** stream: NAL units
//! separated by `00 00 01` start codes, optionally preceded by an extra
//! `00` to form the 4-byte `00 00 00 01` variant. The bytes arrive in
//! chunks that have nothing to do with NAL boundaries, so the splitter
//! keeps whatever it could not close out yet and resumes on the next
//! chunk. Feeding the same stream in any chunking yields the same units.

use bytes::Bytes;
use tracing::trace;

/// Bytes that must be visible while more input may follow, so a start code
/// straddling a chunk boundary is only judged once the next chunk arrives.
const STREAMING_WINDOW: usize = 4;

/// Bytes needed to recognise a start code once the input has ended.
const FINAL_WINDOW: usize = 3;

/// NAL unit types relevant to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalUnitType {
    /// Non-IDR slice (P/B frame).
    NonIdrSlice,
    /// IDR slice (keyframe).
    IdrSlice,
    /// Supplemental Enhancement Information.
    Sei,
    /// Sequence Parameter Set.
    Sps,
    /// Picture Parameter Set.
    Pps,
    /// Access Unit Delimiter.
    Aud,
    /// End of sequence.
    EndOfSequence,
    /// End of stream.
    EndOfStream,
    /// Filler data.
    Filler,
    /// Any other type, carrying the raw 5-bit value.
    Other(u8),
}

impl From<u8> for NalUnitType {
    fn from(byte: u8) -> Self {
        match byte & 0x1F {
            1 => NalUnitType::NonIdrSlice,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::Aud,
            10 => NalUnitType::EndOfSequence,
            11 => NalUnitType::EndOfStream,
            12 => NalUnitType::Filler,
            other => NalUnitType::Other(other),
        }
    }
}

/// A single NAL unit, without its start code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    payload: Bytes,
}

impl NalUnit {
    /// Wrap a payload that starts with the NAL header byte.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The NAL unit bytes, header byte included.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Give up ownership of the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Type from the low 5 bits of the header byte.
    pub fn nal_type(&self) -> NalUnitType {
        self.payload
            .first()
            .map_or(NalUnitType::Other(0), |&header| NalUnitType::from(header))
    }

    /// IDR slices are the only key frames.
    pub fn is_keyframe(&self) -> bool {
        self.nal_type() == NalUnitType::IdrSlice
    }
}

/// Stateful scanner turning arbitrarily chunked Annex-B bytes into NAL units.
///
/// A unit is emitted once the start code that terminates it has been seen.
/// One trailing `00` in front of that start code belongs to a 4-byte start
/// code and is trimmed. The unit still in progress at the end of a chunk is
/// carried into the next [`AnnexBSplitter::feed`]; [`AnnexBSplitter::finish`]
/// flushes it at end of input.
#[derive(Debug, Default)]
pub struct AnnexBSplitter {
    /// Carried bytes followed by the chunks fed since.
    buf: Vec<u8>,
    /// Next scan position in `buf`.
    pos: usize,
    /// Start of the unit in progress, once the first start code was found.
    nal_start: Option<usize>,
}

impl AnnexBSplitter {
    /// Create a splitter with an empty carry buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and iterate over the units it completes.
    ///
    /// Units not pulled from the iterator stay pending and come out of the
    /// next `feed` or `finish`.
    pub fn feed(&mut self, chunk: &[u8]) -> NalUnits<'_> {
        self.compact();
        self.buf.extend_from_slice(chunk);
        NalUnits { splitter: self }
    }

    /// Flush pending units, including the trailing one that no start code
    /// terminated, and reset the splitter.
    pub fn finish(&mut self) -> Vec<NalUnit> {
        // No more bytes can follow, so a 3-byte window settles a start code
        // sitting at the very end of the input.
        let mut units: Vec<NalUnit> =
            std::iter::from_fn(|| self.next_unit(FINAL_WINDOW)).collect();

        if let Some(start) = self.nal_start.take() {
            if start < self.buf.len() {
                units.push(NalUnit::new(Bytes::copy_from_slice(&self.buf[start..])));
            }
        }

        self.buf.clear();
        self.pos = 0;
        units
    }

    /// Number of bytes held over for the next chunk.
    pub fn carried_len(&self) -> usize {
        self.buf.len() - self.keep_from()
    }

    fn keep_from(&self) -> usize {
        self.nal_start.unwrap_or(self.pos)
    }

    /// Drop bytes that can no longer be part of a unit.
    fn compact(&mut self) {
        let keep_from = self.keep_from();
        if keep_from == 0 {
            return;
        }

        self.buf.drain(..keep_from);
        self.pos -= keep_from;
        if let Some(start) = self.nal_start.as_mut() {
            *start = 0;
        }
    }

    /// Scan for the next complete unit, looking at `window` bytes at a time.
    fn next_unit(&mut self, window: usize) -> Option<NalUnit> {
        let buf = &self.buf;

        while self.pos + window <= buf.len() {
            let p = self.pos;
            if buf[p] != 0x00 || buf[p + 1] != 0x00 || buf[p + 2] != 0x01 {
                self.pos += 1;
                continue;
            }

            match self.nal_start {
                None => {
                    self.nal_start = Some(p + 3);
                    self.pos = p + 3;
                }
                Some(start) => {
                    let mut end = p;
                    if p > start && buf[p - 1] == 0x00 {
                        end -= 1;
                    }

                    // Rescan from `end` so this start code opens the next unit.
                    self.pos = end;
                    self.nal_start = None;

                    if end > start {
                        let unit = NalUnit::new(Bytes::copy_from_slice(&buf[start..end]));
                        trace!(
                            size = unit.size(),
                            nal_type = ?unit.nal_type(),
                            "Split NAL unit"
                        );
                        return Some(unit);
                    }
                    trace!("Skipping empty NAL unit");
                }
            }
        }

        None
    }
}

/// Units completed by one [`AnnexBSplitter::feed`] call.
pub struct NalUnits<'a> {
    splitter: &'a mut AnnexBSplitter,
}

impl Iterator for NalUnits<'_> {
    type Item = NalUnit;

    fn next(&mut self) -> Option<NalUnit> {
        self.splitter.next_unit(STREAMING_WINDOW)
    }
}

/// Split a complete in-memory Annex-B stream into NAL units.
pub fn parse_annex_b(data: &[u8]) -> Vec<NalUnit> {
    let mut splitter = AnnexBSplitter::new();
    let mut nals: Vec<NalUnit> = splitter.feed(data).collect();
    nals.extend(splitter.finish());
    nals
}
