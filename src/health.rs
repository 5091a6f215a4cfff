//! A single HTTP health poll against one backend.
//!
//! `HealthCheck` is injected into the [`crate::monitor::Monitor`] at
//! construction time rather than resolved through a process-wide hook, so
//! tests can substitute a scripted fake instead of standing up a real HTTP
//! server.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::backend::Backend;

/// Result of one health poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub index: Option<u64>,
}

impl ProbeOutcome {
    pub const UNHEALTHY: ProbeOutcome = ProbeOutcome {
        healthy: false,
        index: None,
    };
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    healthy: bool,
    wsrep_local_index: u64,
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn probe(&self, backend: &Backend) -> ProbeOutcome;
}

/// Production `HealthCheck`: `GET /api/v1/status` over HTTP, bounded by a
/// fixed per-request timeout so a stuck backend cannot stall a monitor
/// round past that bound.
pub struct ReqwestHealthCheck {
    client: reqwest::Client,
}

impl ReqwestHealthCheck {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is static and always valid");
        ReqwestHealthCheck { client }
    }
}

#[async_trait]
impl HealthCheck for ReqwestHealthCheck {
    async fn probe(&self, backend: &Backend) -> ProbeOutcome {
        let url = backend.healthcheck_url();

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(%url, error = %err, "healthcheck transport error");
                return ProbeOutcome::UNHEALTHY;
            }
        };

        if !response.status().is_success() {
            debug!(%url, status = %response.status(), "healthcheck non-200 response");
            return ProbeOutcome::UNHEALTHY;
        }

        // A decode failure is treated the same as a transport failure:
        // failure closed, never silently accepting zero-valued fields.
        match response.json::<StatusResponse>().await {
            Ok(body) => ProbeOutcome {
                healthy: body.healthy,
                index: Some(body.wsrep_local_index),
            },
            Err(err) => {
                debug!(%url, error = %err, "healthcheck response body did not decode");
                ProbeOutcome::UNHEALTHY
            }
        }
    }
}
