//! Cluster topology configuration.
//!
//! Loaded from a TOML file naming the listen address, the healthcheck
//! timeout, and the ordered list of backends -- a backend's position in
//! this list becomes its stable tie-break index.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub healthcheck_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub listen_addr: SocketAddr,
    pub healthcheck_timeout_secs: u64,
    pub backends: Vec<BackendConfig>,
}

impl ClusterConfig {
    pub fn healthcheck_timeout(&self) -> Duration {
        Duration::from_secs(self.healthcheck_timeout_secs)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, Error> {
        toml::from_str(contents).map_err(|err| Error::Config(err.to_string()))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| Error::Config(format!("reading {}: {err}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Override the listen port while keeping the configured host/IP,
    /// mirroring the CLI's `--port` precedence over the config file.
    pub fn with_port_override(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.listen_addr.set_port(port);
        }
        self
    }
}
