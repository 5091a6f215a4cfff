//! Periodic parallel health probing, deterministic leader election, and
//! subscriber fan-out.
//!
//! Every `healthcheck_timeout / 5`, every backend is probed in parallel.
//! Once all probes of the round have settled, the active backend is
//! recomputed; if it changed, the new value is published to every
//! subscriber. Selection iterates backends in configuration order (never
//! map iteration order) so tie-breaks are stable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::counters::DecisionCounters;
use crate::health::HealthCheck;
use crate::shutdown::Shutdown;

/// The backend new client connections should currently be routed to, or
/// `None` if no backend is healthy.
pub type ActiveBackend = Option<Arc<Backend>>;

/// Monitor-private bookkeeping for one backend. Owned exclusively by the
/// monitor task; never shared, so it needs no synchronization of its own.
struct BackendStatus {
    healthy: bool,
    /// Last observed `wsrep_local_index`. `-1` is the sentinel for "never
    /// observed".
    index: i64,
    counters: DecisionCounters,
}

impl BackendStatus {
    fn new() -> Self {
        let mut counters = DecisionCounters::new();
        // Throttles log noise: only every 5th dial logs its outcome.
        counters.add_condition("log", |counts| {
            counts.get("dial").copied().unwrap_or(0) % 5 == 0
        });
        BackendStatus {
            healthy: false,
            index: -1,
            counters,
        }
    }
}

pub struct Monitor {
    backends: Vec<Arc<Backend>>,
    healthcheck_timeout: Duration,
    health_check: Arc<dyn HealthCheck>,
    active_tx: watch::Sender<ActiveBackend>,
    subscribers: Vec<mpsc::Sender<ActiveBackend>>,
}

impl Monitor {
    /// Builds a `Monitor` and the `watch` channel the accept loop reads the
    /// active backend from. `subscribers` are additional sinks (e.g. an
    /// admin surface) that receive the same notifications; they are assumed
    /// to be promptly drained -- there is no backpressure or drop policy.
    pub fn new(
        backends: Vec<Arc<Backend>>,
        healthcheck_timeout: Duration,
        health_check: Arc<dyn HealthCheck>,
        subscribers: Vec<mpsc::Sender<ActiveBackend>>,
    ) -> (Self, watch::Receiver<ActiveBackend>) {
        let (active_tx, active_rx) = watch::channel(None);
        (
            Monitor {
                backends,
                healthcheck_timeout,
                health_check,
                active_tx,
                subscribers,
            },
            active_rx,
        )
    }

    /// Runs until `shutdown` fires. In-flight probes of the final round
    /// drain but their results are discarded; no new round starts.
    pub async fn run(&self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.healthcheck_timeout / 5);
        let mut statuses: Vec<BackendStatus> =
            self.backends.iter().map(|_| BackendStatus::new()).collect();
        let mut active: Option<usize> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_round(&mut statuses).await;
                    let new_active = self.choose_active_backend(&statuses);

                    if new_active != active {
                        active = new_active;
                        self.publish(active).await;
                    }
                }
                _ = shutdown.recv() => {
                    debug!("monitor stopping");
                    return;
                }
            }
        }
    }

    async fn run_round(&self, statuses: &mut [BackendStatus]) {
        let mut probes = JoinSet::new();

        for (i, backend) in self.backends.iter().enumerate() {
            let backend = Arc::clone(backend);
            let health_check = Arc::clone(&self.health_check);
            probes.spawn(async move {
                let outcome = health_check.probe(&backend).await;
                (i, outcome)
            });
        }

        let mut outcomes: Vec<Option<crate::health::ProbeOutcome>> =
            (0..self.backends.len()).map(|_| None).collect();
        while let Some(result) = probes.join_next().await {
            match result {
                Ok((i, outcome)) => outcomes[i] = Some(outcome),
                Err(err) => warn!(error = %err, "healthcheck probe task panicked"),
            }
        }

        for (i, outcome) in outcomes.into_iter().enumerate() {
            let Some(outcome) = outcome else {
                // The probe task itself panicked; this backend's status is
                // left unchanged for this round.
                continue;
            };

            let backend = &self.backends[i];
            let status = &mut statuses[i];

            if let Some(index) = outcome.index {
                status.index = index as i64;
                backend.record_observed_index(index);
            }

            status.counters.increment("dial");
            let should_log = status.counters.should("log");

            if outcome.healthy {
                backend.set_healthy();
                status.healthy = true;
                status.counters.reset("consecutiveUnhealthyChecks");
                if should_log {
                    debug!(backend = %backend.host(), "healthcheck succeeded");
                }
            } else {
                backend.set_unhealthy();
                status.healthy = false;
                status.counters.increment("consecutiveUnhealthyChecks");
                if should_log {
                    warn!(
                        backend = %backend.host(),
                        consecutive_failures = status.counters.get("consecutiveUnhealthyChecks"),
                        "healthcheck failed"
                    );
                }
            }
        }
    }

    /// Among healthy backends, the smallest observed index; ties broken by
    /// earlier configuration position. `None` if no backend is healthy.
    fn choose_active_backend(&self, statuses: &[BackendStatus]) -> Option<usize> {
        let mut best: Option<usize> = None;

        for (i, status) in statuses.iter().enumerate() {
            if !status.healthy {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(current_best) if status.index < statuses[current_best].index => {
                    best = Some(i)
                }
                Some(_) => {}
            }
        }

        best
    }

    async fn publish(&self, active: Option<usize>) {
        let value = active.map(|i| Arc::clone(&self.backends[i]));

        match &value {
            Some(backend) => info!(backend = %backend.host(), index = backend.index(), "new active backend"),
            None => warn!("no active backend"),
        }

        let _ = self.active_tx.send(value.clone());
        for subscriber in &self.subscribers {
            let _ = subscriber.send(value.clone()).await;
        }
    }
}
