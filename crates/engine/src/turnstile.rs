//! Admission control primitives.
//!
//! The turnstile is the server's sole backpressure mechanism against excess
//! concurrent connections. It is deliberately a counting gate, not a queue:
//! wake order among blocked entrants is unspecified and must not be relied
//! upon. The address screen is the boundary to an external abuse oracle —
//! consulted by higher-level access logic, never by the engine itself.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Mutex, RwLock};

use tokio::sync::Notify;

/// Counting gate bounding concurrently admitted connections.
#[derive(Debug)]
pub struct Turnstile {
    limit: usize,
    active: Mutex<usize>,
    vacancy: Notify,
}

impl Turnstile {
    /// A limit of 0 means unlimited: `enter` never blocks.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            active: Mutex::new(0),
            vacancy: Notify::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn active(&self) -> usize {
        *self.active.lock().expect("turnstile lock poisoned")
    }

    /// Block until the active count is below the limit, then take a slot.
    pub async fn enter(&self) {
        loop {
            let vacancy = self.vacancy.notified();
            {
                let mut active = self.active.lock().expect("turnstile lock poisoned");
                if self.limit == 0 || *active < self.limit {
                    *active += 1;
                    return;
                }
            }
            vacancy.await;
        }
    }

    /// Release a slot and wake one waiter.
    pub fn exit(&self) {
        {
            let mut active = self.active.lock().expect("turnstile lock poisoned");
            *active = active.saturating_sub(1);
        }
        self.vacancy.notify_one();
    }
}

/// Boolean oracle answering "is this address on the abuse list?".
pub trait AddressScreen: Send + Sync {
    fn contains(&self, address: &IpAddr) -> bool;
}

/// In-memory deny list.
#[derive(Debug, Default)]
pub struct DenyList {
    addresses: RwLock<HashSet<IpAddr>>,
}

impl DenyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, address: IpAddr) {
        self.addresses
            .write()
            .expect("deny list lock poisoned")
            .insert(address);
    }

    pub fn remove(&self, address: &IpAddr) {
        self.addresses
            .write()
            .expect("deny list lock poisoned")
            .remove(address);
    }

    pub fn len(&self) -> usize {
        self.addresses.read().expect("deny list lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AddressScreen for DenyList {
    fn contains(&self, address: &IpAddr) -> bool {
        self.addresses
            .read()
            .expect("deny list lock poisoned")
            .contains(address)
    }
}
