//! One duplex byte pump between a client socket and a backend socket.
//!
//! Two unidirectional copies run concurrently. Whichever finishes first --
//! by EOF, by I/O error, or by an external [`Bridge::close`] -- cancels the
//! other, so the bridge as a whole terminates promptly instead of leaving
//! one direction parked on a read that will never complete. The tunneled
//! protocol is opaque to this module; it never inspects the bytes it moves.

use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, instrument};

#[derive(Debug)]
pub struct Bridge {
    id: u64,
    client: std::sync::Mutex<Option<TcpStream>>,
    backend: std::sync::Mutex<Option<TcpStream>>,
    closed_tx: watch::Sender<bool>,
}

impl Bridge {
    pub fn new(id: u64, client: TcpStream, backend: TcpStream) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Bridge {
            id,
            client: std::sync::Mutex::new(Some(client)),
            backend: std::sync::Mutex::new(Some(backend)),
            closed_tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Force termination from outside. Idempotent; safe to call
    /// concurrently with `run` or with another `close`, and safe to call
    /// before `run` has started: `send_replace` updates the stored value
    /// even with zero live receivers, unlike `send`, which would otherwise
    /// silently drop a `close()` that races `run`'s first `subscribe()`.
    pub fn close(&self) {
        self.closed_tx.send_replace(true);
    }

    /// Run the relay until both directions have finished. Does not return
    /// early: a caller that wants to abort the relay should call `close`
    /// from another task.
    #[instrument(skip(self), fields(bridge_id = self.id))]
    pub async fn run(&self) {
        let client = self
            .client
            .lock()
            .unwrap()
            .take()
            .expect("Bridge::run called more than once");
        let backend = self
            .backend
            .lock()
            .unwrap()
            .take()
            .expect("Bridge::run called more than once");

        let (client_read, client_write) = client.into_split();
        let (backend_read, backend_write) = backend.into_split();

        let client_to_backend = pump(
            client_read,
            backend_write,
            self.closed_tx.clone(),
            self.closed_tx.subscribe(),
        );
        let backend_to_client = pump(
            backend_read,
            client_write,
            self.closed_tx.clone(),
            self.closed_tx.subscribe(),
        );

        // Whichever direction finishes first -- EOF, an I/O error, or an
        // external `close()` -- marks `closed_tx` itself, which unblocks the
        // other direction's pending read on its next `select!` iteration.
        let (client_bytes, backend_bytes) = tokio::join!(client_to_backend, backend_to_client);

        debug!(
            client_to_backend_bytes = client_bytes,
            backend_to_client_bytes = backend_bytes,
            "bridge closed"
        );
    }
}

/// Copy bytes from `reader` to `writer` until EOF, an I/O error, or
/// cancellation via `cancel`, whichever comes first. Returns the number of
/// bytes successfully forwarded. Errors are swallowed: the relay is
/// oblivious to payload semantics and there is nothing meaningful to report.
async fn pump(
    mut reader: impl io::AsyncRead + Unpin,
    mut writer: impl io::AsyncWrite + Unpin,
    closed_tx: watch::Sender<bool>,
    mut cancel: watch::Receiver<bool>,
) -> u64 {
    let mut buf = [0u8; 8 * 1024];
    let mut total = 0u64;

    loop {
        if *cancel.borrow() {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if writer.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                        total += n as u64;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    // Mark the bridge closed so the sibling direction's pending read is
    // cancelled too, regardless of which of the two finished first.
    closed_tx.send_replace(true);
    let _ = writer.shutdown().await;
    total
}
