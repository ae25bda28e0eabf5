//! Message codec.
//!
//! Responsibilities:
//! - Frame layout: `[kind: u16 BE][role: u8][body bytes]`. The kind id is
//!   always written, even for kinds whose body is empty or variable-length.
//! - Incremental decode: callers feed arbitrary raw chunks (as read from a
//!   socket) and pull zero or more complete messages.
//!
//! Error handling:
//! - An unknown kind fails before a single byte is consumed, so one bad
//!   frame cannot desynchronize the caller's understanding of the stream.
//! - `Incomplete` from the body decoders is mapped to "need more data";
//!   every other `WireError` is a protocol violation the caller should
//!   disconnect over.
//!
//! Logging:
//! - Every successful encode/decode emits a trace event on `parlor::wire`
//!   (see `WIRE_TARGET`); purely observational.
//!
//! (C) Parlor

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::WIRE_TARGET;
use crate::message::{Message, Role};
use crate::registry::Registry;
use crate::wire::{BodyReader, BodyWriter, WireError};

/// Bytes of framing ahead of the body: kind id plus role byte.
const HEADER_BYTES: usize = 3;

/// Serialize one message and append it to `out`.
pub fn encode_message(message: &Message, out: &mut BytesMut) -> Result<(), WireError> {
    let start = out.len();
    out.put_u16(message.kind());
    out.put_u8(message.role().as_u8());

    let mut w = BodyWriter::new(out);
    if let Err(err) = message.body().encode(&mut w) {
        // Leave previously encoded frames intact.
        out.truncate(start);
        return Err(err);
    }

    trace!(
        target: WIRE_TARGET,
        kind = message.kind(),
        role = ?message.role(),
        bytes = out.len() - start,
        "encoded message"
    );
    Ok(())
}

/// Stateful incremental decoder. Feed raw chunks via `push_bytes`, then
/// repeatedly call `next_message` until it returns `Ok(None)`.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: BytesMut,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply additional raw bytes.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Buffer for the next socket read; bytes written into it become part
    /// of the undecoded backlog.
    pub fn read_buf(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Attempt to pull one complete message.
    ///
    /// Returns:
    /// - `Ok(Some(message))` when a full frame was decoded (and removed)
    /// - `Ok(None)` when more bytes are needed
    /// - `Err` on a protocol violation; the buffer is left untouched so the
    ///   failure is deterministic on retry
    pub fn next_message(&mut self, registry: &Registry) -> Result<Option<Message>, WireError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let kind = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        if !registry.contains(kind) {
            return Err(WireError::UnknownKind { kind });
        }
        if self.buf.len() < HEADER_BYTES {
            return Ok(None);
        }
        let role = Role::from_u8(self.buf[2])?;

        let mut r = BodyReader::new(&self.buf[HEADER_BYTES..]);
        match registry.decode_body(kind, &mut r) {
            Ok(body) => {
                let frame_len = HEADER_BYTES + r.consumed();
                self.buf.advance(frame_len);
                trace!(
                    target: WIRE_TARGET,
                    kind,
                    ?role,
                    bytes = frame_len,
                    "decoded message"
                );
                Ok(Some(Message::new(body).with_role(role)))
            }
            Err(WireError::Incomplete) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Undecoded byte backlog (diagnostics).
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop any buffered bytes (after a fatal error).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
