//! AMF0 script data encoding.
//!
//! The publisher only ever writes one script message, `onMetaData`, with
//! numeric properties. This is the subset of AMF0 needed for that:
//!
//! ```text
//! string:  0x02 | u16 length | UTF-8 bytes
//! number:  0x00 | f64 big-endian
//! object:  0x03 | (u16 name length | name | value)* | 0x00 0x00 0x09
//! ```

use bytes::{BufMut, Bytes, BytesMut};

const MARKER_NUMBER: u8 = 0x00;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_OBJECT_END: u8 = 0x09;

/// Short strings carry a u16 length.
const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Incremental AMF0 writer.
#[derive(Debug, Default)]
pub struct ScriptDataEncoder {
    buf: BytesMut,
}

impl ScriptDataEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(128),
        }
    }

    /// Write a string value.
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        self.buf.put_u8(MARKER_STRING);
        self.put_utf8(value);
        self
    }

    /// Write a number value.
    pub fn put_number(&mut self, value: f64) -> &mut Self {
        self.buf.put_u8(MARKER_NUMBER);
        self.buf.put_f64(value);
        self
    }

    /// Open an anonymous object. Close it with [`Self::end_object`].
    pub fn begin_object(&mut self) -> &mut Self {
        self.buf.put_u8(MARKER_OBJECT);
        self
    }

    /// Write a `name: number` pair inside an open object.
    pub fn put_number_property(&mut self, name: &str, value: f64) -> &mut Self {
        self.put_utf8(name);
        self.put_number(value)
    }

    /// Empty property name followed by the object end marker.
    pub fn end_object(&mut self) -> &mut Self {
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the encoded bytes, leaving the encoder empty.
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn put_utf8(&mut self, value: &str) {
        debug_assert!(
            value.len() <= MAX_STRING_LEN,
            "AMF0 string too long: {} bytes",
            value.len()
        );
        let value = clamp_to_char_boundary(value, MAX_STRING_LEN);
        self.buf.put_u16(value.len() as u16);
        self.buf.put_slice(value.as_bytes());
    }
}

/// Longest prefix of `value` that fits in `max` bytes and ends on a
/// character boundary.
fn clamp_to_char_boundary(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_encoding() {
        let mut encoder = ScriptDataEncoder::new();
        encoder.put_string("onMetaData");
        let bytes = encoder.finish();

        assert_eq!(bytes[0], MARKER_STRING);
        assert_eq!(&bytes[1..3], &[0x00, 0x0A]);
        assert_eq!(&bytes[3..], b"onMetaData");
    }

    #[test]
    fn test_number_is_big_endian_double() {
        let mut encoder = ScriptDataEncoder::new();
        encoder.put_number(1280.0);
        let bytes = encoder.finish();

        assert_eq!(bytes[0], MARKER_NUMBER);
        assert_eq!(&bytes[1..], &1280.0f64.to_be_bytes());
    }

    #[test]
    fn test_object_layout() {
        let mut encoder = ScriptDataEncoder::new();
        encoder
            .begin_object()
            .put_number_property("width", 640.0)
            .end_object();
        let bytes = encoder.finish();

        let mut expected = vec![MARKER_OBJECT, 0x00, 0x05];
        expected.extend_from_slice(b"width");
        expected.push(MARKER_NUMBER);
        expected.extend_from_slice(&640.0f64.to_be_bytes());
        expected.extend_from_slice(&[0x00, 0x00, MARKER_OBJECT_END]);
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_clamp_keeps_whole_characters() {
        assert_eq!(clamp_to_char_boundary("width", 16), "width");
        // 'é' is two bytes; cutting at 2 would split it.
        assert_eq!(clamp_to_char_boundary("aé", 2), "a");
        assert_eq!(clamp_to_char_boundary("aé", 3), "aé");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "AMF0 string too long")]
    fn test_oversized_string_asserts() {
        let long = "x".repeat(MAX_STRING_LEN + 1);
        ScriptDataEncoder::new().put_string(&long);
    }

    #[test]
    fn test_finish_resets_encoder() {
        let mut encoder = ScriptDataEncoder::new();
        encoder.put_number(1.0);
        assert_eq!(encoder.len(), 9);

        let _ = encoder.finish();
        assert!(encoder.is_empty());
    }
}
