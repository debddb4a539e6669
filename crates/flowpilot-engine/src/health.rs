use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowpilot_core::config::HealthConfig;
use flowpilot_core::traits::ExecutionService;
use flowpilot_core::ServiceStatus;

use crate::state::SharedState;

/// Probes `GET /health` and keeps the service status current.
pub struct HealthMonitor {
    state: SharedState,
    service: Arc<dyn ExecutionService>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(state: SharedState, service: Arc<dyn ExecutionService>, config: HealthConfig) -> Self {
        Self {
            state,
            service,
            config,
        }
    }

    /// Probe once. A probe that errors or outlives the timeout marks the
    /// service offline.
    pub async fn probe(&self) -> ServiceStatus {
        let status = match tokio::time::timeout(self.config.timeout(), self.service.health()).await {
            Ok(Ok(resp)) => {
                debug!(status = %resp.status, "Health probe ok");
                ServiceStatus::Online
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Health probe failed");
                ServiceStatus::Offline
            }
            Err(_) => {
                warn!(timeout_secs = self.config.timeout_secs, "Health probe timed out");
                ServiceStatus::Offline
            }
        };
        self.state.set_service_status(status);
        status
    }

    /// Probe immediately, then every `probe_interval_secs`. Blocks until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.probe_interval_secs,
            "Health monitor started"
        );
        loop {
            tokio::select! {
                _ = self.probe() => {}
                _ = cancel.cancelled() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.probe_interval()) => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!("Health monitor shutting down");
    }
}
