use tokio::sync::broadcast;

/// Listens for a process-wide shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value
/// is ever sent; once it has been, the listener should shut down. Used both
/// by per-connection accept-loop tasks and by the monitor's own stop signal.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received.
    is_shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    pub async fn recv(&mut self) {
        // Already received -- return immediately.
        if self.is_shutdown {
            return;
        }

        // Cannot receive a "lag" error since only one value is ever sent.
        let _ = self.notify.recv().await;

        self.is_shutdown = true;
    }
}
