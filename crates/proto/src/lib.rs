//! Wire protocol primitives for the Parlor connection engine.
//!
//! This crate hosts everything both ends of a connection agree on:
//! - message: the framed message type and its closed set of bodies
//! - wire: field-level primitives (capped strings, fixed-width integers)
//! - registry: the id -> decoder table installed once per deployment
//! - codec: encoding and incremental stream decoding
//!
//! Keep this crate free of I/O and runtime types; the engine crate owns
//! sockets, queues and executions.

pub mod codec;
pub mod message;
pub mod registry;
pub mod wire;

pub use codec::{MessageDecoder, encode_message};
pub use message::{Body, Message, Role, kind};
pub use registry::Registry;
pub use wire::{BodyReader, BodyWriter, MAX_STRING_BYTES, WireError};

/// Tracing target for wire-level encode/decode events. Enable with a
/// subscriber filter such as `parlor::wire=trace`; disabled it costs nothing
/// and never alters control flow.
pub const WIRE_TARGET: &str = "parlor::wire";
