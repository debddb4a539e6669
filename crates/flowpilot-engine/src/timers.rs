use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowpilot_core::traits::ExecutionService;
use flowpilot_core::{Result, ServiceStatus, TimerRecord};

use crate::reveal::{spawn_reveal, RevealHandle, RevealItem, RevealTiming};
use crate::state::SharedState;

/// Client-side mirror of the remote schedules.
///
/// Refreshed on its own cadence and after every successful command. A
/// refresh fully replaces the local list.
#[derive(Clone)]
pub struct TimerRegistry {
    state: SharedState,
    service: Arc<dyn ExecutionService>,
    timing: RevealTiming,
    refresh_interval: Duration,
}

impl TimerRegistry {
    pub fn new(
        state: SharedState,
        service: Arc<dyn ExecutionService>,
        timing: RevealTiming,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            state,
            service,
            timing,
            refresh_interval,
        }
    }

    pub fn list(&self) -> Vec<TimerRecord> {
        self.state.timers()
    }

    /// Refetch the schedule list. Skipped while the service is offline.
    pub async fn refresh(&self) -> Result<usize> {
        if self.state.service_status() == ServiceStatus::Offline {
            debug!("Service offline, skipping timer refresh");
            return Ok(self.state.read(|s| s.timers.len()));
        }
        let timers = self.service.list_timers().await?;
        let count = timers.len();
        self.state.replace_timers(timers);
        debug!(count, "Timer registry refreshed");
        Ok(count)
    }

    /// Refresh after a successful command; a failed refresh is only logged.
    async fn refresh_after(&self, command: &str) {
        if let Err(e) = self.refresh().await {
            warn!(command, error = %e, "Timer refresh after command failed");
        }
    }

    pub async fn pause(&self, timer_id: &str) -> Result<()> {
        self.state.ensure_online()?;
        self.service.pause_timer(timer_id).await?;
        info!(timer = %timer_id, "Timer paused");
        self.refresh_after("pause").await;
        Ok(())
    }

    pub async fn resume(&self, timer_id: &str) -> Result<()> {
        self.state.ensure_online()?;
        self.service.resume_timer(timer_id).await?;
        info!(timer = %timer_id, "Timer resumed");
        self.refresh_after("resume").await;
        Ok(())
    }

    pub async fn delete(&self, timer_id: &str) -> Result<()> {
        self.state.ensure_online()?;
        self.service.delete_timer(timer_id).await?;
        info!(timer = %timer_id, "Timer deleted");
        self.refresh_after("delete").await;
        Ok(())
    }

    /// Fire a schedule now. Its log batch is revealed like a normal run and
    /// its results replace the result map.
    pub async fn execute_now(&self, timer_id: &str) -> Result<RevealHandle> {
        self.state.ensure_online()?;
        let response = self.service.execute_timer_now(timer_id).await?;
        info!(timer = %timer_id, success = response.success, "Timer executed");

        if let Some(results) = response.result {
            self.state.replace_results(results);
        }
        let epoch = self.state.read(|s| s.epoch());
        let items = RevealItem::from_remote(response.logs, false);
        let handle = spawn_reveal(&self.state, epoch, items, self.timing);

        self.refresh_after("execute-now").await;
        Ok(handle)
    }

    /// Refresh loop. Blocks until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.refresh_interval.as_secs(),
            "Timer registry refresh started"
        );
        loop {
            if let Err(e) = self.refresh().await {
                debug!(error = %e, "Timer refresh failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval) => {}
                _ = cancel.cancelled() => {
                    info!("Timer registry refresh shutting down");
                    break;
                }
            }
        }
    }
}
