//! Parlor connection engine.
//!
//! The engine owns everything between an accepted (or dialed) TCP socket
//! and the application protocol built on top of it:
//! - queue: the per-connection outbound batch queue
//! - connection: one socket plus its independent receiver and sender
//!   executions, observer dispatch and teardown
//! - turnstile: admission control (counting gate, address screen)
//! - context: the constructed-once home of the registry, connection
//!   directory, counters and shutdown
//! - status / error / config: taxonomy, error types and knobs
//!
//! Delivery guarantees are per connection only: outbound messages go on
//! the wire in submission order, inbound and outbound directions are fully
//! independent, and nothing is ordered across distinct connections.

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod observer;
pub mod queue;
pub mod status;
pub mod turnstile;

pub use config::{ConfigError, EngineConfig};
pub use connection::{Connection, ReadEvent};
pub use context::EngineContext;
pub use error::EngineError;
pub use observer::{ConnectionObserver, Delivery, Disposition, ObserverError};
pub use queue::{OutboundQueue, QueueClosed};
pub use status::CloseStatus;
pub use turnstile::{AddressScreen, DenyList, Turnstile};
