//! Shared helpers for the engine integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use parlor_engine::{
    Connection, ConnectionObserver, Delivery, Disposition, EngineConfig, EngineContext,
    ObserverError,
};
use parlor_proto::{Body, Registry};
use tokio::net::{TcpListener, TcpStream};

/// Install a test subscriber once; `RUST_LOG=parlor::wire=trace` shows the
/// wire traffic of a failing test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Server- and client-side contexts with default configuration. Two
/// separate instances on purpose: contexts are explicit, not process-wide.
pub fn contexts() -> (Arc<EngineContext>, Arc<EngineContext>) {
    init_tracing();
    (
        EngineContext::new(EngineConfig::default(), Registry::builtin()),
        EngineContext::new(EngineConfig::default(), Registry::builtin()),
    )
}

pub async fn listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// Accept one connection while dialing it: returns (accepted, dialed).
pub async fn tcp_pair(listener: &TcpListener) -> (TcpStream, TcpStream) {
    let addr = listener.local_addr().unwrap();
    let (accepted, dialed) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    (accepted.unwrap().0, dialed.unwrap())
}

/// Observer recording every delivery it sees, never claiming any.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Delivery>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn message_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, Delivery::Message(_)))
            .count()
    }

    pub fn closed_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, Delivery::Closed))
            .count()
    }

    pub fn timeout_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, Delivery::Timeout))
            .count()
    }

    /// Bodies of the recorded messages, in arrival order.
    pub fn bodies(&self) -> Vec<Body> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                Delivery::Message(message) => Some(message.body().clone()),
                _ => None,
            })
            .collect()
    }
}

impl ConnectionObserver for Recorder {
    fn on_delivery(
        &self,
        _connection: &Connection,
        delivery: &Delivery,
    ) -> Result<Disposition, ObserverError> {
        self.events.lock().unwrap().push(delivery.clone());
        Ok(Disposition::Continue)
    }
}

/// Poll `done` every 10 ms until it holds; panic past `limit`.
pub async fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !done() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
