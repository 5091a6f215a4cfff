//! Accept loop: the consumer of the monitor's active-backend notifications.
//!
//! Accepts inbound client connections and routes each to whatever backend
//! the monitor currently considers active. A separate task watches the same
//! notification channel and severs the previously active backend's live
//! sessions the instant leadership changes.

use std::future::Future;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::monitor::ActiveBackend;
use crate::shutdown::Shutdown;

struct Listener {
    listener: TcpListener,
    active_backend: watch::Receiver<ActiveBackend>,
}

/// Accepts connections from `listener`, routing each to the backend
/// currently held in `active_backend`, until `shutdown` resolves.
pub async fn run(
    listener: TcpListener,
    active_backend: watch::Receiver<ActiveBackend>,
    shutdown: impl Future,
) {
    let (notify_shutdown, _) = broadcast::channel(1);

    let sever_task = tokio::spawn(sever_on_leadership_change(
        active_backend.clone(),
        Shutdown::new(notify_shutdown.subscribe()),
    ));

    let mut server = Listener {
        listener,
        active_backend,
    };

    tokio::select! {
        res = server.run() => {
            if let Err(err) = res {
                error!(cause = %err, "failed to accept");
            }
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }

    drop(notify_shutdown);
    let _ = sever_task.await;
}

impl Listener {
    /// Accept inbound connections, spawning a task per connection that
    /// bridges it to the currently active backend. Mirrors the exponential
    /// backoff retry used when `accept()` itself fails transiently.
    async fn run(&mut self) -> crate::error::Result<()> {
        info!("accepting inbound connections");

        loop {
            let socket = self.accept().await?;
            let backend = self.active_backend.borrow().clone();

            tokio::spawn(async move {
                match backend {
                    Some(backend) => {
                        if let Err(err) = backend.bridge(socket).await {
                            warn!(error = %err, "failed to bridge client connection to backend");
                        }
                    }
                    None => {
                        warn!("no active backend; closing client connection");
                    }
                }
            });
        }
    }

    async fn accept(&mut self) -> crate::error::Result<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(err.into());
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

/// Watches the active-backend channel; whenever the value changes and the
/// previous value was `Some`, severs that backend's live bridges.
async fn sever_on_leadership_change(
    mut active_backend: watch::Receiver<ActiveBackend>,
    mut shutdown: Shutdown,
) {
    let mut previous: ActiveBackend = active_backend.borrow().clone();

    loop {
        tokio::select! {
            changed = active_backend.changed() => {
                if changed.is_err() {
                    return;
                }
                let current = active_backend.borrow().clone();
                if let Some(old) = previous.take() {
                    let differs = match &current {
                        Some(new) => !Arc::ptr_eq(&old, new),
                        None => true,
                    };
                    if differs {
                        info!(backend = %old.host(), "leadership lost; severing live connections");
                        old.sever_connections();
                    }
                }
                previous = current;
            }
            _ = shutdown.recv() => {
                debug!("leadership watcher stopping");
                return;
            }
        }
    }
}
