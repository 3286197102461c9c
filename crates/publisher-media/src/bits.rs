//! MSB-first bit reader with Exp-Golomb decoding.

use crate::error::SpsError;

/// Reads bits most-significant first from a byte slice.
///
/// The reader tracks the name of the parsing stage it is in so that a
/// truncated bitstream reports where decoding gave up.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
    stage: &'static str,
}

impl<'a> BitReader<'a> {
    /// Create a reader positioned at the first bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            stage: "start",
        }
    }

    /// Name the stage subsequent reads belong to.
    pub fn enter(&mut self, stage: &'static str) {
        self.stage = stage;
    }

    /// Stage named by the last [`Self::enter`].
    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Bits consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Total number of bits in the input.
    pub fn bit_len(&self) -> usize {
        self.data.len() * 8
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.bit_len()
    }

    /// Fail unless at least one unread bit is left.
    ///
    /// Called at stage boundaries: a stage that ends exactly on the last bit
    /// of the input leaves nothing for the stages after it.
    pub fn ensure_remaining(&self) -> Result<(), SpsError> {
        if self.has_remaining() {
            Ok(())
        } else {
            Err(self.malformed())
        }
    }

    pub fn read_bit(&mut self) -> Result<bool, SpsError> {
        if !self.has_remaining() {
            return Err(self.malformed());
        }
        let byte = self.data[self.position / 8];
        let bit = (byte >> (7 - self.position % 8)) & 1;
        self.position += 1;
        Ok(bit == 1)
    }

    /// Read `count` bits (at most 32) as an unsigned value.
    pub fn read_bits(&mut self, count: u32) -> Result<u32, SpsError> {
        debug_assert!(count <= 32, "read_bits supports at most 32 bits");
        if self.position + count as usize > self.bit_len() {
            return Err(self.malformed());
        }

        let mut value: u64 = 0;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value as u32)
    }

    /// Unsigned Exp-Golomb code: `n` leading zeros, a one, then `n` suffix
    /// bits, decoding to `2^n - 1 + suffix`.
    pub fn read_ue(&mut self) -> Result<u32, SpsError> {
        let mut leading_zeros = 0u32;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(SpsError::InvalidValue("exp-golomb code longer than 32 bits"));
            }
        }

        let suffix = self.read_bits(leading_zeros)?;
        let value = (1u64 << leading_zeros) - 1 + u64::from(suffix);
        u32::try_from(value).map_err(|_| SpsError::InvalidValue("exp-golomb value overflows u32"))
    }

    /// Signed Exp-Golomb field.
    ///
    /// Decoded with the unsigned mapping, matching the publisher's established
    /// behavior. Every signed field in an SPS is either skipped or ignored, so
    /// only the number of bits consumed matters, and that is identical.
    pub fn read_se(&mut self) -> Result<u32, SpsError> {
        self.read_ue()
    }

    fn malformed(&self) -> SpsError {
        SpsError::MalformedBitstream {
            stage: self.stage,
            position: self.position,
            bit_len: self.bit_len(),
        }
    }
}
