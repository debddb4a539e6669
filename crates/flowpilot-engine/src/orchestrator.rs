use std::sync::Arc;

use tracing::{info, warn};

use flowpilot_core::protocol::{ExecuteNodeRequest, ExecuteWorkflowRequest};
use flowpilot_core::traits::ExecutionService;
use flowpilot_core::{FlowError, LogEntry, LogStatus, Result};

use crate::reveal::{spawn_reveal, RevealHandle, RevealItem, RevealTiming};
use crate::session::Session;
use crate::state::SharedState;
use crate::timers::TimerRegistry;

pub const STOPPED_MESSAGE: &str = "Execution stopped by user";
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The workflow was never named, so nothing ran.
    Aborted,
    /// The service accepted the run; its log batch is still being revealed.
    Completed { reveal: RevealHandle },
    /// A save, service, or network failure, already recorded in the log.
    Failed { message: String },
    /// Cancelled through [`Orchestrator::stop`].
    Stopped,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Wait for the reveal batch of a completed run.
    pub async fn wait_revealed(self) {
        if let Self::Completed { reveal } = self {
            reveal.finished().await;
        }
    }
}

/// Message for a failed call: remote rejections keep their text, transport
/// failures are marked as network errors.
fn failure_message(error: &FlowError) -> String {
    match error {
        FlowError::Remote(msg) => msg.clone(),
        other => format!("Network error: {}", other),
    }
}

/// Single-flight execution of the open workflow.
#[derive(Clone)]
pub struct Orchestrator {
    state: SharedState,
    service: Arc<dyn ExecutionService>,
    session: Session,
    timers: TimerRegistry,
    timing: RevealTiming,
}

impl Orchestrator {
    pub fn new(
        state: SharedState,
        service: Arc<dyn ExecutionService>,
        session: Session,
        timers: TimerRegistry,
        timing: RevealTiming,
    ) -> Self {
        Self {
            state,
            service,
            session,
            timers,
            timing,
        }
    }

    /// Save, then run the whole graph (optionally from `start_node_id`).
    ///
    /// Returns as soon as the service answers; the log batch keeps revealing
    /// in the background while the state is already back to idle.
    pub async fn run<N>(&self, start_node_id: Option<String>, namer: N) -> Result<RunOutcome>
    where
        N: FnOnce(&str) -> Option<String> + Send,
    {
        self.state.ensure_online()?;
        if self.state.read(|s| s.graph.is_empty()) {
            return Err(FlowError::EmptyWorkflow);
        }
        if let Some(id) = &start_node_id {
            if self.state.read(|s| s.graph.node(id).is_none()) {
                return Err(FlowError::NodeNotFound(id.clone()));
            }
        }

        match self.session.save(namer).await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(RunOutcome::Aborted),
            Err(e) => {
                let message = format!("Failed to save workflow: {}", e);
                warn!(error = %e, "Save before run failed");
                self.state.append_log(LogEntry::system_error(&message));
                return Ok(RunOutcome::Failed { message });
            }
        }

        let (nodes, connections, has_timer) = self.state.read(|s| {
            (
                s.graph.nodes().to_vec(),
                s.graph.sanitized_connections(),
                s.graph.has_scheduling_node(),
            )
        });
        let epoch = self.state.reset_output();
        let (run_id, cancel) = self.state.begin_run();
        info!(run_id, nodes = nodes.len(), start = ?start_node_id, "Run started");

        let request = ExecuteWorkflowRequest {
            nodes,
            connections,
            start_node_id,
        };
        let response = tokio::select! {
            response = self.service.execute_workflow(request) => response,
            _ = cancel.cancelled() => {
                info!(run_id, "Run cancelled");
                return Ok(RunOutcome::Stopped);
            }
        };
        if !self.state.is_current_run(run_id) {
            return Ok(RunOutcome::Stopped);
        }

        let ingested = match response {
            Ok(resp) if resp.success => {
                let results = resp.result.unwrap_or_default();
                info!(run_id, results = results.len(), logs = resp.logs.len(), "Run succeeded");
                self.state.replace_results(results);
                Ok(RevealItem::from_remote(resp.logs, true))
            }
            Ok(resp) => {
                let message = resp.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                warn!(run_id, error = %message, "Run failed");
                self.state.append_log(LogEntry::system_error(&message));
                Err(message)
            }
            Err(e) => {
                let message = failure_message(&e);
                warn!(run_id, error = %e, "Run request failed");
                self.state.append_log(LogEntry::system_error(&message));
                Err(message)
            }
        };

        // Idle from here on; the reveal owns the highlight.
        self.state.finish_run(run_id);
        let items = match ingested {
            Ok(items) => items,
            Err(message) => return Ok(RunOutcome::Failed { message }),
        };
        let reveal = spawn_reveal(&self.state, epoch, items, self.timing);

        if has_timer {
            if let Err(e) = self.timers.refresh().await {
                warn!(error = %e, "Timer refresh after run failed");
            }
        }
        Ok(RunOutcome::Completed { reveal })
    }

    /// Run one node in isolation. Logs and results of earlier runs are kept.
    ///
    /// Scheduling nodes are saved first so the scheduler has a workflow to
    /// attach to; other nodes skip persistence.
    pub async fn run_single_node<N>(&self, node_id: &str, namer: N) -> Result<RunOutcome>
    where
        N: FnOnce(&str) -> Option<String> + Send,
    {
        self.state.ensure_online()?;
        let node = self
            .state
            .read(|s| s.graph.node(node_id).cloned())
            .ok_or_else(|| FlowError::NodeNotFound(node_id.to_string()))?;
        let scheduling = node.kind().is_scheduling();

        if scheduling {
            match self.session.save(namer).await {
                Ok(Some(_)) => {}
                Ok(None) => return Ok(RunOutcome::Aborted),
                Err(e) => {
                    let message = format!("Failed to save workflow: {}", e);
                    self.state.append_log(LogEntry::system_error(&message));
                    return Ok(RunOutcome::Failed { message });
                }
            }
        }

        let (run_id, cancel) = self.state.begin_run();
        self.state.highlight(node_id);
        info!(run_id, node_id = %node_id, kind = %node.kind(), "Node run started");

        let label = node.label.clone();
        let request = ExecuteNodeRequest {
            node_data: node,
            input_data: None,
        };
        let response = tokio::select! {
            response = self.service.execute_node(request) => response,
            _ = cancel.cancelled() => return Ok(RunOutcome::Stopped),
        };
        if !self.state.is_current_run(run_id) {
            return Ok(RunOutcome::Stopped);
        }

        let outcome = match response {
            Ok(resp) if resp.success => {
                let result = resp.result.unwrap_or(serde_json::Value::Null);
                self.state
                    .merge_results(vec![(node_id.to_string(), result.clone())]);
                self.state.append_log(
                    LogEntry::new(
                        node_id,
                        LogStatus::Success,
                        format!("{} executed successfully", label),
                    )
                    .with_payload(result),
                );
                RunOutcome::Completed {
                    reveal: RevealHandle::none(),
                }
            }
            Ok(resp) => {
                let message = resp.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                self.state
                    .append_log(LogEntry::new(node_id, LogStatus::Error, &message));
                RunOutcome::Failed { message }
            }
            Err(e) => {
                let message = failure_message(&e);
                self.state
                    .append_log(LogEntry::new(node_id, LogStatus::Error, &message));
                RunOutcome::Failed { message }
            }
        };
        self.state.finish_run(run_id);

        if scheduling && outcome.is_completed() {
            if let Err(e) = self.timers.refresh().await {
                warn!(error = %e, "Timer refresh after node run failed");
            }
        }
        Ok(outcome)
    }

    /// Cancel the active run. Only valid while running.
    pub fn stop(&self) -> Result<()> {
        self.state.stop_run(STOPPED_MESSAGE)?;
        info!("Run stopped by user");
        Ok(())
    }
}
