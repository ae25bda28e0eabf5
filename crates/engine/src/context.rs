//! Engine context: process-wide services, constructed once.
//!
//! One explicit context object replaces hidden global registries: the
//! message registry, the turnstile, the connection directory and the
//! aggregate counters all live here, so a test suite can run many isolated
//! engine instances in one process.
//!
//! The directory lock is dedicated to bookkeeping and is never taken by a
//! connection's hot read/write path, so unrelated connections do not
//! serialize behind it.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use parlor_proto::Registry;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::status::CloseStatus;
use crate::turnstile::Turnstile;

#[derive(Default)]
struct Directory {
    by_id: HashMap<u64, Arc<Connection>>,
    by_address: HashMap<IpAddr, Vec<Arc<Connection>>>,
}

/// Shared services for one engine instance. Connections capture an
/// `Arc<EngineContext>` at construction; nothing here is a process-wide
/// static.
pub struct EngineContext {
    config: EngineConfig,
    registry: Registry,
    turnstile: Turnstile,
    next_id: AtomicU64,
    directory: Mutex<Directory>,
    sent: AtomicU64,
    received: AtomicU64,
}

impl EngineContext {
    /// Build a context with its deployment-defined registry. The registry
    /// is installed once, before any connection starts, and never swapped
    /// afterwards.
    pub fn new(config: EngineConfig, registry: Registry) -> Arc<Self> {
        let turnstile = Turnstile::new(config.connection_limit);
        Arc::new(Self {
            config,
            registry,
            turnstile,
            next_id: AtomicU64::new(1),
            directory: Mutex::new(Directory::default()),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn turnstile(&self) -> &Turnstile {
        &self.turnstile
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add(&self, conn: &Arc<Connection>) {
        let mut directory = self.directory.lock().expect("directory lock poisoned");
        directory.by_id.insert(conn.id(), Arc::clone(conn));
        directory
            .by_address
            .entry(conn.address())
            .or_default()
            .push(Arc::clone(conn));
    }

    pub(crate) fn remove(&self, conn: &Connection) {
        let mut directory = self.directory.lock().expect("directory lock poisoned");
        directory.by_id.remove(&conn.id());
        if let Some(peers) = directory.by_address.get_mut(&conn.address()) {
            peers.retain(|existing| existing.id() != conn.id());
            if peers.is_empty() {
                directory.by_address.remove(&conn.address());
            }
        }
    }

    /// Number of open connections.
    pub fn count(&self) -> usize {
        self.directory
            .lock()
            .expect("directory lock poisoned")
            .by_id
            .len()
    }

    /// Number of distinct peer addresses among open connections.
    pub fn unique_count(&self) -> usize {
        self.directory
            .lock()
            .expect("directory lock poisoned")
            .by_address
            .len()
    }

    /// Every open connection from one peer address.
    pub fn get(&self, address: IpAddr) -> Vec<Arc<Connection>> {
        self.directory
            .lock()
            .expect("directory lock poisoned")
            .by_address
            .get(&address)
            .cloned()
            .unwrap_or_default()
    }

    /// True when another open connection from the same address started no
    /// later than `conn`. Equal creation milliseconds break ties by
    /// connection id: the lower id wins and is not the duplicate.
    pub fn is_duplicate(&self, conn: &Connection) -> bool {
        let directory = self.directory.lock().expect("directory lock poisoned");
        directory
            .by_address
            .get(&conn.address())
            .is_some_and(|peers| {
                peers.iter().any(|other| {
                    other.id() != conn.id()
                        && other.is_open()
                        && (other.created_millis() < conn.created_millis()
                            || (other.created_millis() == conn.created_millis()
                                && other.id() < conn.id()))
                })
            })
    }

    /// Close every open connection from one address. Returns how many were
    /// closed.
    pub fn close_address(&self, address: IpAddr, status: CloseStatus) -> usize {
        let peers = self.get(address);
        for conn in &peers {
            conn.close(status);
        }
        peers.len()
    }

    pub(crate) fn record_sent(&self, n: u64) {
        if self.config.counting_enabled {
            self.sent.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_received(&self, n: u64) {
        if self.config.counting_enabled {
            self.received.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Total messages written to the wire (0 unless counting is enabled).
    pub fn sent_total(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Total messages decoded off the wire (0 unless counting is enabled).
    pub fn received_total(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Stop every connection with the forced-shutdown status, then wait for
    /// the executions — each up to the configured join bound, after which
    /// it is abandoned. Never blocks indefinitely on a hung peer.
    pub async fn shutdown(&self) {
        let connections: Vec<Arc<Connection>> = {
            let directory = self.directory.lock().expect("directory lock poisoned");
            directory.by_id.values().cloned().collect()
        };
        info!(connections = connections.len(), "engine shutdown");

        for conn in &connections {
            conn.close(CloseStatus::Unavailable);
        }

        let join_limit = self.config.shutdown_join();
        for conn in connections {
            let (receiver, sender) = conn.take_execution_handles();
            for handle in [sender, receiver].into_iter().flatten() {
                if timeout(join_limit, handle).await.is_err() {
                    warn!(id = conn.id(), "abandoning execution past join bound");
                }
            }
        }
        debug!("engine shutdown complete");
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("connections", &self.count())
            .field("unique_addresses", &self.unique_count())
            .field("turnstile_active", &self.turnstile.active())
            .finish_non_exhaustive()
    }
}
