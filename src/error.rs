use thiserror::Error;

/// Errors surfaced to callers of this crate.
///
/// Most failures the switchboard encounters are recovered locally (an
/// unhealthy backend simply falls out of leader selection; a broken bridge
/// is quietly removed from its registry) and never reach this type. Only
/// conditions the caller can actually act on are represented here.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not open a TCP connection to a backend's data port.
    #[error("failed to connect to backend: {0}")]
    Dial(#[source] std::io::Error),

    /// `BridgeRegistry::remove` was called for a bridge that was not a
    /// member of the set. Indicates a double-remove bug.
    #[error("bridge not found in registry")]
    RegistryNotFound,

    /// The cluster configuration file could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Any other I/O error surfaced to a caller (e.g. the accept loop).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The global tracing subscriber could not be installed.
    #[error(transparent)]
    Tracing(#[from] tracing_subscriber::util::TryInitError),
}

pub type Result<T> = std::result::Result<T, Error>;
