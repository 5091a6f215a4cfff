//! A single replica in the cluster.
//!
//! Identity (host, ports, configuration-order index) is fixed at
//! construction. Health and the last observed `wsrep_local_index` are
//! mutated by the monitor; the bridge registry is mutated by whichever
//! client sessions land on this backend. A `Backend` owns its registry
//! exclusively so `sever_connections` only ever affects its own sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::Error;
use crate::registry::BridgeRegistry;

#[derive(Debug)]
pub struct Backend {
    host: String,
    port: u16,
    healthcheck_port: u16,
    index: usize,
    healthy: AtomicBool,
    last_index: Mutex<Option<u64>>,
    registry: BridgeRegistry,
}

impl Backend {
    pub fn new(host: impl Into<String>, port: u16, healthcheck_port: u16, index: usize) -> Self {
        Backend {
            host: host.into(),
            port,
            healthcheck_port,
            index,
            healthy: AtomicBool::new(false),
            last_index: Mutex::new(None),
            registry: BridgeRegistry::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn healthcheck_port(&self) -> u16 {
        self.healthcheck_port
    }

    /// Stable configuration-order position, used as the tie-break in leader
    /// selection.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn healthcheck_url(&self) -> String {
        format!(
            "http://{}:{}/api/v1/status",
            self.host, self.healthcheck_port
        )
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self) {
        self.healthy.store(true, Ordering::Relaxed);
    }

    pub fn set_unhealthy(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }

    /// Last `wsrep_local_index` reported by this backend's health probe, if
    /// any has ever been observed.
    pub fn last_observed_index(&self) -> Option<u64> {
        *self.last_index.lock().unwrap()
    }

    pub fn record_observed_index(&self, index: u64) {
        *self.last_index.lock().unwrap() = Some(index);
    }

    /// Dial the data port, bridge `client` to it, register the bridge, and
    /// launch the relay in the background. Returns once the relay task is
    /// spawned -- it does not wait for the session to end. On a dial
    /// failure, the caller is expected to close `client`.
    ///
    /// Takes `self` behind an `Arc` so the spawned task can keep the owning
    /// `Backend` (and therefore its registry) alive independently of the
    /// caller's own lifetime.
    pub async fn bridge(self: &Arc<Self>, client: TcpStream) -> Result<(), Error> {
        let addr = (self.host.as_str(), self.port);
        let backend_conn = TcpStream::connect(addr).await.map_err(Error::Dial)?;

        let bridge = self.registry.create(client, backend_conn);
        debug!(backend = %self.host, port = self.port, bridge_id = bridge.id(), "bridge created");

        let backend = Arc::clone(self);
        tokio::spawn(async move {
            bridge.run().await;
            if let Err(err) = backend.registry.remove(&bridge) {
                warn!(bridge_id = bridge.id(), error = %err, "bridge already removed from registry");
            }
        });

        Ok(())
    }

    pub fn sever_connections(&self) {
        self.registry.remove_and_close_all();
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &BridgeRegistry {
        &self.registry
    }
}
