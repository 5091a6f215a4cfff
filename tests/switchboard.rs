//! End-to-end tests driving the monitor and accept loop together against a
//! full running switchboard. Each test stands up fake backends (plain echo
//! listeners, no real MySQL needed) and a scripted health check, then
//! exercises the switchboard exactly as a client would see it over TCP.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use switchboard::health::{HealthCheck, ProbeOutcome};
use switchboard::monitor::Monitor;
use switchboard::{server, Backend};

/// Health check whose verdict for each backend is flipped by the test body,
/// rather than fixed up front -- lets a test trigger failover at a moment
/// of its own choosing instead of a pre-scripted round count.
struct ToggleHealthCheck {
    healthy: Vec<Arc<AtomicBool>>,
}

impl ToggleHealthCheck {
    fn new(backend_count: usize) -> Self {
        ToggleHealthCheck {
            healthy: (0..backend_count).map(|_| Arc::new(AtomicBool::new(false))).collect(),
        }
    }

    fn set(&self, index: usize, healthy: bool) {
        self.healthy[index].store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthCheck for ToggleHealthCheck {
    async fn probe(&self, backend: &Backend) -> ProbeOutcome {
        let idx = backend.index();
        if self.healthy[idx].load(Ordering::SeqCst) {
            ProbeOutcome {
                healthy: true,
                index: Some(idx as u64),
            }
        } else {
            ProbeOutcome::UNHEALTHY
        }
    }
}

/// A data-port stand-in: accepts connections and echoes back every byte it
/// reads, prefixed with `tag` so a test can tell which backend answered.
async fn spawn_tagged_echo_backend(tag: u8) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            let mut reply = vec![tag];
                            reply.extend_from_slice(&buf[..n]);
                            if socket.write_all(&reply).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition did not become true in time");
}

async fn wait_until_connectable(addr: std::net::SocketAddr) {
    wait_until(|| std::net::TcpStream::connect(addr).is_ok()).await;
}

/// Reads until the peer closes the connection, with a generous bound, and
/// returns whether it actually did. Used to confirm a severed session's
/// socket was really torn down rather than merely idle.
async fn observes_eof(socket: &mut TcpStream) -> bool {
    let mut buf = [0u8; 8];
    for _ in 0..300 {
        match socket.try_read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => {}
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => return true,
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Scenario A: a single healthy backend relays bytes in both directions.
#[tokio::test]
async fn basic_relay_reaches_the_active_backend() {
    let backend_addr = spawn_tagged_echo_backend(b'0').await;
    let backend = Arc::new(Backend::new(
        backend_addr.ip().to_string(),
        backend_addr.port(),
        0,
        0,
    ));

    let health_check = Arc::new(ToggleHealthCheck::new(1));
    health_check.set(0, true);

    let (monitor, active_rx) = Monitor::new(
        vec![backend],
        Duration::from_millis(50),
        health_check,
        vec![],
    );
    let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let monitor_task =
        tokio::spawn(async move { monitor.run(switchboard::Shutdown::new(shutdown_rx)).await });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let switchboard_addr = listener.local_addr().unwrap();
    let server_task = tokio::spawn(async move {
        server::run(listener, active_rx, std::future::pending::<()>()).await
    });

    wait_until_connectable(switchboard_addr).await;

    let mut client = TcpStream::connect(switchboard_addr).await.unwrap();
    client.write_all(b"hello").await.unwrap();

    let mut buf = [0u8; 6];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"0hello");

    server_task.abort();
    monitor_task.abort();
}

/// Scenario B: when the active backend becomes unhealthy and a second
/// backend takes over, the in-flight session on the old backend is severed
/// and new connections are routed to the new one.
#[tokio::test]
async fn failover_severs_old_sessions_and_routes_to_new_backend() {
    let addr0 = spawn_tagged_echo_backend(b'0').await;
    let addr1 = spawn_tagged_echo_backend(b'1').await;

    let backend0 = Arc::new(Backend::new(addr0.ip().to_string(), addr0.port(), 0, 0));
    let backend1 = Arc::new(Backend::new(addr1.ip().to_string(), addr1.port(), 0, 1));

    let health_check = Arc::new(ToggleHealthCheck::new(2));
    health_check.set(0, true);
    health_check.set(1, true);

    let (monitor, active_rx) = Monitor::new(
        vec![Arc::clone(&backend0), Arc::clone(&backend1)],
        Duration::from_millis(50),
        Arc::clone(&health_check) as Arc<dyn HealthCheck>,
        vec![],
    );
    let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let monitor_task =
        tokio::spawn(async move { monitor.run(switchboard::Shutdown::new(shutdown_rx)).await });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let switchboard_addr = listener.local_addr().unwrap();
    let server_task = tokio::spawn(async move {
        server::run(listener, active_rx.clone(), std::future::pending::<()>()).await
    });

    wait_until_connectable(switchboard_addr).await;
    wait_until(|| backend0.is_healthy()).await;

    // Open a session against backend 0 and confirm it is live.
    let mut first = TcpStream::connect(switchboard_addr).await.unwrap();
    first.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 5];
    first.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"0ping");

    // Backend 0 goes unhealthy; backend 1 is the sole healthy option left.
    health_check.set(0, false);
    wait_until(|| backend1.is_healthy() && !backend0.is_healthy()).await;

    assert!(
        observes_eof(&mut first).await,
        "session on the deposed backend should be severed"
    );

    // New connections now land on backend 1.
    let mut second = TcpStream::connect(switchboard_addr).await.unwrap();
    second.write_all(b"pong").await.unwrap();
    let mut buf = [0u8; 5];
    second.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"1pong");

    server_task.abort();
    monitor_task.abort();
}

/// Scenario F: many concurrent sessions on one backend are all severed
/// together the instant it loses leadership, none left dangling.
#[tokio::test]
async fn mass_sever_closes_every_live_session_on_failover() {
    let addr0 = spawn_tagged_echo_backend(b'0').await;
    let addr1 = spawn_tagged_echo_backend(b'1').await;

    let backend0 = Arc::new(Backend::new(addr0.ip().to_string(), addr0.port(), 0, 0));
    let backend1 = Arc::new(Backend::new(addr1.ip().to_string(), addr1.port(), 0, 1));

    let health_check = Arc::new(ToggleHealthCheck::new(2));
    health_check.set(0, true);
    health_check.set(1, true);

    let (monitor, active_rx) = Monitor::new(
        vec![Arc::clone(&backend0), Arc::clone(&backend1)],
        Duration::from_millis(50),
        Arc::clone(&health_check) as Arc<dyn HealthCheck>,
        vec![],
    );
    let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let monitor_task =
        tokio::spawn(async move { monitor.run(switchboard::Shutdown::new(shutdown_rx)).await });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let switchboard_addr = listener.local_addr().unwrap();
    let server_task = tokio::spawn(async move {
        server::run(listener, active_rx.clone(), std::future::pending::<()>()).await
    });

    wait_until_connectable(switchboard_addr).await;
    wait_until(|| backend0.is_healthy()).await;

    let mut sessions = Vec::new();
    for _ in 0..20 {
        let mut socket = TcpStream::connect(switchboard_addr).await.unwrap();
        socket.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 3];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"0hi");
        sessions.push(socket);
    }

    health_check.set(0, false);
    wait_until(|| backend1.is_healthy() && !backend0.is_healthy()).await;

    for mut session in sessions {
        assert!(observes_eof(&mut session).await, "every session on the deposed backend should be severed");
    }

    server_task.abort();
    monitor_task.abort();
}
