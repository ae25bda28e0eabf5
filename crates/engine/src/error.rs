//! Engine error types.

use parlor_proto::WireError;
use thiserror::Error;

/// Failures surfaced by connection operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The connection has been closed; no further traffic is possible.
    #[error("connection is closed")]
    Closed,

    /// The receive direction is owned by the receiver execution (or another
    /// synchronous reader) and cannot be used directly.
    #[error("receive direction is busy")]
    ReceiverBusy,

    /// The send direction is owned by the sender execution (or another
    /// synchronous writer) and cannot be used directly.
    #[error("send direction is busy")]
    SenderBusy,

    /// Wire-level protocol failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Transport-level I/O failure.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
