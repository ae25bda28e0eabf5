//! Observer-side delivery types.
//!
//! Each connection notifies an explicit list of observers, in registration
//! order. A decoded message, a read timeout and the terminal close sentinel
//! all arrive through the same channel so observers see one coherent event
//! stream per connection.

use std::sync::Arc;

use parlor_proto::Message;
use thiserror::Error;

use crate::connection::Connection;

/// One notification from a connection's receive path.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// A decoded inbound message.
    Message(Arc<Message>),
    /// The read timer elapsed with no traffic. Deliberately a value, not an
    /// error: callers that care watch `Connection::consecutive_timeouts`.
    Timeout,
    /// The sentinel "no more messages, connection is gone" signal. Delivered
    /// to every observer exactly once, after which all observers are
    /// detached.
    Closed,
}

/// What a successful observer callback tells the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Offer the delivery to the remaining observers too.
    Continue,
    /// This observer claimed the delivery; suppress later observers for
    /// this notification. Provides no exclusivity beyond the single
    /// dispatch — shared state still needs its own synchronization.
    Claimed,
}

/// Failure raised by an observer while handling a delivery. Caught at the
/// dispatch boundary and reported to the peer as a fault message; never
/// allowed to kill the receiver execution.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ObserverError(String);

impl ObserverError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// A subscriber interested in one connection's inbound traffic.
pub trait ConnectionObserver: Send + Sync {
    fn on_delivery(
        &self,
        connection: &Connection,
        delivery: &Delivery,
    ) -> Result<Disposition, ObserverError>;
}
