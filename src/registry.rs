//! Thread-safe set of live [`Bridge`]s belonging to one backend.
//!
//! Membership is exact: a bridge is present iff it has not yet completed and
//! has not been severed. The registry mutex is only ever held across
//! in-memory map operations -- never across socket I/O -- so it cannot
//! deadlock against a bridge's own completion handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;

use crate::bridge::Bridge;
use crate::error::Error;

#[derive(Debug, Default)]
pub struct BridgeRegistry {
    bridges: Mutex<HashMap<u64, Arc<Bridge>>>,
    next_id: AtomicU64,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        BridgeRegistry {
            bridges: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Construct a bridge between `client` and `backend` and register it.
    /// The caller is responsible for driving the bridge (spawning
    /// `Bridge::run`) and calling [`BridgeRegistry::remove`] on completion.
    pub fn create(&self, client: TcpStream, backend: TcpStream) -> Arc<Bridge> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bridge = Arc::new(Bridge::new(id, client, backend));

        let mut bridges = self.bridges.lock().unwrap();
        bridges.insert(id, Arc::clone(&bridge));

        bridge
    }

    /// Remove a bridge by identity. Errors with [`Error::RegistryNotFound`]
    /// if the bridge is not a current member -- this is how a double-remove
    /// bug is surfaced.
    pub fn remove(&self, bridge: &Bridge) -> Result<(), Error> {
        let mut bridges = self.bridges.lock().unwrap();
        bridges
            .remove(&bridge.id())
            .map(|_| ())
            .ok_or(Error::RegistryNotFound)
    }

    /// Atomically swap out the current set, then close every bridge that
    /// was in it. The swap happens under the lock; the closes happen after
    /// it is released, so a bridge racing to remove itself on natural
    /// completion never deadlocks against this call.
    pub fn remove_and_close_all(&self) {
        let drained: Vec<Arc<Bridge>> = {
            let mut bridges = self.bridges.lock().unwrap();
            std::mem::take(&mut *bridges).into_values().collect()
        };

        for bridge in drained {
            bridge.close();
        }
    }

    pub fn size(&self) -> usize {
        self.bridges.lock().unwrap().len()
    }

    pub fn contains(&self, bridge: &Bridge) -> bool {
        self.bridges.lock().unwrap().contains_key(&bridge.id())
    }
}
