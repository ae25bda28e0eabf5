//! Field-level wire primitives shared by every message body.
//!
//! Layout rules:
//! - Integers are fixed-width big-endian.
//! - Strings are `[len: u16 BE][utf-8 bytes]`, capped at `MAX_STRING_BYTES`.
//! - Bodies are self-delimiting: given the message kind, the reader knows
//!   exactly how many bytes to consume.
//!
//! Error handling:
//! - Shortfall is reported as `WireError::Incomplete`; callers buffer more
//!   input and retry from the start of the frame.
//! - Size violations are checked before any allocation, so a hostile length
//!   prefix cannot force a large buffer into existence.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Hard cap for any length-prefixed string field, enforced on both encode
/// and decode. Chat text is the largest field this protocol carries.
pub const MAX_STRING_BYTES: usize = 8 * 1024;

/// Failures while reading or writing message fields and frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Not enough buffered bytes to finish the current frame.
    /// Retry once more input has arrived; nothing was consumed.
    #[error("incomplete frame, more bytes required")]
    Incomplete,

    /// The 2-byte type id is not present in the installed registry.
    #[error("unknown message kind 0x{kind:04x}")]
    UnknownKind { kind: u16 },

    /// A string field's length prefix exceeds the wire cap.
    #[error("string field of {len} bytes exceeds cap of {max}")]
    StringTooLong { len: usize, max: usize },

    /// The role byte is outside the defined range.
    #[error("invalid role byte 0x{0:02x}")]
    BadRole(u8),

    /// Structurally invalid field content.
    #[error("malformed field: {0}")]
    Malformed(&'static str),
}

impl WireError {
    /// True for failures the peer caused by violating the protocol
    /// (as opposed to a frame that is merely not fully buffered yet).
    pub fn is_violation(&self) -> bool {
        !matches!(self, WireError::Incomplete)
    }
}

/// Cursor over a body's raw bytes. Tracks how much it consumed so the
/// decoder can advance the stream buffer by exactly one frame.
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// Read a length-prefixed string. The cap is checked before waiting for
    /// the payload bytes, so an oversized prefix fails immediately instead
    /// of stalling as `Incomplete`.
    pub fn get_string(&mut self) -> Result<String, WireError> {
        let len = self.get_u16()? as usize;
        if len > MAX_STRING_BYTES {
            return Err(WireError::StringTooLong {
                len,
                max: MAX_STRING_BYTES,
            });
        }
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| WireError::Malformed("string field is not valid utf-8"))
    }
}

/// Append-only writer for message bodies; the counterpart of `BodyReader`.
pub struct BodyWriter<'a> {
    out: &'a mut BytesMut,
}

impl<'a> BodyWriter<'a> {
    pub fn new(out: &'a mut BytesMut) -> Self {
        Self { out }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.out.put_u8(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.out.put_u8(u8::from(v));
    }

    pub fn put_u16(&mut self, v: u16) {
        self.out.put_u16(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.out.put_u32(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.out.put_u64(v);
    }

    pub fn put_string(&mut self, s: &str) -> Result<(), WireError> {
        let len = s.len();
        if len > MAX_STRING_BYTES {
            return Err(WireError::StringTooLong {
                len,
                max: MAX_STRING_BYTES,
            });
        }
        self.out.put_u16(len as u16);
        self.out.put_slice(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip() {
        let mut buf = BytesMut::new();
        let mut w = BodyWriter::new(&mut buf);
        w.put_u8(7);
        w.put_u16(0xBEEF);
        w.put_u32(0xDEAD_BEEF);
        w.put_u64(u64::MAX);
        w.put_bool(true);

        let mut r = BodyReader::new(&buf);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u16().unwrap(), 0xBEEF);
        assert_eq!(r.get_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.get_u64().unwrap(), u64::MAX);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.consumed(), buf.len());
    }

    #[test]
    fn string_round_trip() {
        let mut buf = BytesMut::new();
        let mut w = BodyWriter::new(&mut buf);
        w.put_string("lobby").unwrap();
        w.put_string("").unwrap();

        let mut r = BodyReader::new(&buf);
        assert_eq!(r.get_string().unwrap(), "lobby");
        assert_eq!(r.get_string().unwrap(), "");
    }

    #[test]
    fn short_input_is_incomplete() {
        let mut r = BodyReader::new(&[0x00]);
        assert_eq!(r.get_u16(), Err(WireError::Incomplete));
        // Nothing consumed on failure paths that never got their bytes.
        assert_eq!(r.consumed(), 0);
    }

    #[test]
    fn truncated_string_is_incomplete() {
        // Prefix claims 5 bytes, only 2 present.
        let mut r = BodyReader::new(&[0x00, 0x05, b'a', b'b']);
        assert_eq!(r.get_string(), Err(WireError::Incomplete));
    }

    #[test]
    fn oversized_string_rejected_before_payload() {
        // Length prefix over the cap with no payload at all: must fail as a
        // violation, not stall as Incomplete.
        let len = (MAX_STRING_BYTES + 1) as u16;
        let bytes = len.to_be_bytes();
        let mut r = BodyReader::new(&bytes);
        assert!(matches!(
            r.get_string(),
            Err(WireError::StringTooLong { .. })
        ));
    }

    #[test]
    fn oversized_string_rejected_on_encode() {
        let mut buf = BytesMut::new();
        let mut w = BodyWriter::new(&mut buf);
        let big = "x".repeat(MAX_STRING_BYTES + 1);
        assert!(matches!(
            w.put_string(&big),
            Err(WireError::StringTooLong { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut r = BodyReader::new(&[0x00, 0x02, 0xFF, 0xFE]);
        assert!(matches!(r.get_string(), Err(WireError::Malformed(_))));
    }
}
