pub mod backend;
pub mod bridge;
pub mod config;
pub mod counters;
pub mod error;
pub mod health;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use backend::Backend;
pub use bridge::Bridge;
pub use config::{BackendConfig, ClusterConfig};
pub use error::{Error, Result};
pub use health::{HealthCheck, ProbeOutcome, ReqwestHealthCheck};
pub use monitor::{ActiveBackend, Monitor};
pub use registry::BridgeRegistry;
pub use shutdown::Shutdown;
