use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;

use flowpilot_core::protocol::*;
use flowpilot_core::traits::{ExecutionService, WorkflowStore};
use flowpilot_core::{
    FlowError, Node, Result, TimerRecord, TimerStatus, Workflow, WorkflowSummary,
};

use crate::fixtures;

/// A request the mock received.
#[derive(Debug, Clone)]
pub enum Call {
    Health,
    ExecuteWorkflow(ExecuteWorkflowRequest),
    ExecuteNode { node_type: String, node_id: String },
    NodeStatus(Vec<String>),
    ListTimers,
    PauseTimer(String),
    ResumeTimer(String),
    DeleteTimer(String),
    ExecuteTimerNow(String),
    SetupTimer { node_id: String, workflow_id: String },
    ListWorkflows,
    GetWorkflow(String),
    CreateWorkflow { name: String, body: WorkflowBody },
    UpdateWorkflow { id: String, body: WorkflowBody },
    DeleteWorkflow(String),
}

#[derive(Default)]
struct MockState {
    healthy: bool,
    calls: Vec<Call>,
    execute: VecDeque<Result<ExecuteWorkflowResponse>>,
    execute_node: VecDeque<Result<ExecuteNodeResponse>>,
    node_status: VecDeque<Result<NodeStatusResponse>>,
    execute_now: VecDeque<Result<ExecuteWorkflowResponse>>,
    timers: Vec<TimerRecord>,
    fail_timers: bool,
    fail_setup_timer: bool,
    workflows: HashMap<String, Workflow>,
    next_workflow: u32,
}

/// Scripted stand-in for the execution service and the workflow store.
///
/// Responses queued with `push_*` are served in order; once a queue is empty
/// the mock answers with a benign default. Every call is recorded.
pub struct MockService {
    state: Mutex<MockState>,
    latency: Option<Duration>,
    listing_latency: Option<Duration>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                healthy: true,
                ..Default::default()
            }),
            latency: None,
            listing_latency: None,
        }
    }

    /// Delay execution calls (`execute-workflow`, `execute-node`,
    /// `execute-now`) by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay `GET /timers` by `latency`; the call is recorded up front.
    pub fn with_listing_latency(mut self, latency: Duration) -> Self {
        self.listing_latency = Some(latency);
        self
    }

    pub fn with_timers(self, timers: Vec<TimerRecord>) -> Self {
        self.state().timers = timers;
        self
    }

    pub fn with_workflow(self, id: &str, workflow: Workflow) -> Self {
        self.state().workflows.insert(id.to_string(), workflow);
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state().healthy = healthy;
    }

    pub fn set_timers(&self, timers: Vec<TimerRecord>) {
        self.state().timers = timers;
    }

    /// Make every timer command fail with an HTTP error.
    pub fn fail_timers(&self, fail: bool) {
        self.state().fail_timers = fail;
    }

    pub fn fail_setup_timer(&self, fail: bool) {
        self.state().fail_setup_timer = fail;
    }

    pub fn push_execute(&self, response: Result<ExecuteWorkflowResponse>) {
        self.state().execute.push_back(response);
    }

    pub fn push_execute_node(&self, response: Result<ExecuteNodeResponse>) {
        self.state().execute_node.push_back(response);
    }

    pub fn push_node_status(&self, response: Result<NodeStatusResponse>) {
        self.state().node_status.push_back(response);
    }

    pub fn push_execute_now(&self, response: Result<ExecuteWorkflowResponse>) {
        self.state().execute_now.push_back(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn workflow(&self, id: &str) -> Option<Workflow> {
        self.state().workflows.get(id).cloned()
    }

    fn timer_command(&self, call: Call, id: &str, apply: impl FnOnce(&mut Vec<TimerRecord>, usize)) -> Result<()> {
        let mut state = self.state();
        state.calls.push(call);
        if state.fail_timers {
            return Err(FlowError::Http("timer command failed".into()));
        }
        let index = state
            .timers
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| FlowError::Remote(format!("Timer {} not found", id)))?;
        apply(&mut state.timers, index);
        Ok(())
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionService for MockService {
    fn health(&self) -> BoxFuture<'_, Result<HealthResponse>> {
        let healthy = {
            let mut state = self.state();
            state.calls.push(Call::Health);
            state.healthy
        };
        Box::pin(async move {
            if healthy {
                Ok(HealthResponse {
                    status: "healthy".into(),
                })
            } else {
                Err(FlowError::Http("connection refused".into()))
            }
        })
    }

    fn execute_workflow(
        &self,
        request: ExecuteWorkflowRequest,
    ) -> BoxFuture<'_, Result<ExecuteWorkflowResponse>> {
        let response = {
            let mut state = self.state();
            state.calls.push(Call::ExecuteWorkflow(request));
            state
                .execute
                .pop_front()
                .unwrap_or_else(|| Ok(fixtures::success_response(Default::default(), Vec::new())))
        };
        Box::pin(async move {
            self.delay().await;
            response
        })
    }

    fn execute_node(
        &self,
        request: ExecuteNodeRequest,
    ) -> BoxFuture<'_, Result<ExecuteNodeResponse>> {
        let response = {
            let mut state = self.state();
            state.calls.push(Call::ExecuteNode {
                node_type: request.node_data.kind().to_string(),
                node_id: request.node_data.id.clone(),
            });
            state.execute_node.pop_front().unwrap_or_else(|| {
                Ok(ExecuteNodeResponse {
                    success: true,
                    result: Some(serde_json::json!({"ok": true})),
                    error: None,
                })
            })
        };
        Box::pin(async move {
            self.delay().await;
            response
        })
    }

    fn node_status(&self, node_ids: Vec<String>) -> BoxFuture<'_, Result<NodeStatusResponse>> {
        let response = {
            let mut state = self.state();
            state.calls.push(Call::NodeStatus(node_ids));
            state.node_status.pop_front().unwrap_or_else(|| Ok(Default::default()))
        };
        Box::pin(async move { response })
    }

    fn list_timers(&self) -> BoxFuture<'_, Result<Vec<TimerRecord>>> {
        let response = {
            let mut state = self.state();
            state.calls.push(Call::ListTimers);
            if state.fail_timers {
                Err(FlowError::Http("timer listing failed".into()))
            } else {
                Ok(state.timers.clone())
            }
        };
        let latency = self.listing_latency;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            response
        })
    }

    fn pause_timer(&self, timer_id: &str) -> BoxFuture<'_, Result<()>> {
        let result = self.timer_command(Call::PauseTimer(timer_id.into()), timer_id, |timers, i| {
            timers[i].status = TimerStatus::Paused;
        });
        Box::pin(async move { result })
    }

    fn resume_timer(&self, timer_id: &str) -> BoxFuture<'_, Result<()>> {
        let result = self.timer_command(Call::ResumeTimer(timer_id.into()), timer_id, |timers, i| {
            timers[i].status = TimerStatus::Active;
        });
        Box::pin(async move { result })
    }

    fn delete_timer(&self, timer_id: &str) -> BoxFuture<'_, Result<()>> {
        let result = self.timer_command(Call::DeleteTimer(timer_id.into()), timer_id, |timers, i| {
            timers.remove(i);
        });
        Box::pin(async move { result })
    }

    fn execute_timer_now(&self, timer_id: &str) -> BoxFuture<'_, Result<ExecuteWorkflowResponse>> {
        let response = {
            let mut state = self.state();
            state.calls.push(Call::ExecuteTimerNow(timer_id.into()));
            if state.fail_timers {
                Err(FlowError::Http("timer command failed".into()))
            } else {
                state
                    .execute_now
                    .pop_front()
                    .unwrap_or_else(|| Ok(fixtures::success_response(Default::default(), Vec::new())))
            }
        };
        Box::pin(async move {
            self.delay().await;
            response
        })
    }

    fn setup_timer(&self, node: Node, workflow_id: &str) -> BoxFuture<'_, Result<serde_json::Value>> {
        let response = {
            let mut state = self.state();
            state.calls.push(Call::SetupTimer {
                node_id: node.id.clone(),
                workflow_id: workflow_id.into(),
            });
            if state.fail_setup_timer {
                Err(FlowError::Remote("scheduler unavailable".into()))
            } else {
                let id = format!("timer-{}", node.id);
                state.timers.retain(|t| t.id != id);
                state
                    .timers
                    .push(fixtures::timer_record(&id, &node.id, TimerStatus::Active));
                Ok(serde_json::json!({"success": true, "timer_id": id}))
            }
        };
        Box::pin(async move { response })
    }
}

impl WorkflowStore for MockService {
    fn list_workflows(&self) -> BoxFuture<'_, Result<Vec<WorkflowSummary>>> {
        let response = {
            let mut state = self.state();
            state.calls.push(Call::ListWorkflows);
            let mut list: Vec<WorkflowSummary> = state
                .workflows
                .iter()
                .map(|(id, wf)| WorkflowSummary {
                    id: id.clone(),
                    name: wf.name.clone(),
                })
                .collect();
            list.sort_by(|a, b| a.id.cmp(&b.id));
            list
        };
        Box::pin(async move { Ok(response) })
    }

    fn get_workflow(&self, id: &str) -> BoxFuture<'_, Result<Workflow>> {
        self.record(Call::GetWorkflow(id.into()));
        let response = self
            .workflow(id)
            .ok_or_else(|| FlowError::Remote(format!("Workflow {} not found", id)));
        Box::pin(async move { response })
    }

    fn create_workflow(&self, name: &str, body: WorkflowBody) -> BoxFuture<'_, Result<String>> {
        let id = {
            let mut state = self.state();
            state.next_workflow += 1;
            let id = format!("wf-{}", state.next_workflow);
            state.workflows.insert(
                id.clone(),
                Workflow {
                    name: name.into(),
                    nodes: body.nodes.clone(),
                    connections: body.connections.clone(),
                    status: None,
                },
            );
            state.calls.push(Call::CreateWorkflow {
                name: name.into(),
                body,
            });
            id
        };
        Box::pin(async move { Ok(id) })
    }

    fn update_workflow(&self, id: &str, body: WorkflowBody) -> BoxFuture<'_, Result<()>> {
        let response = {
            let mut state = self.state();
            let result = match state.workflows.get_mut(id) {
                Some(wf) => {
                    wf.nodes = body.nodes.clone();
                    wf.connections = body.connections.clone();
                    Ok(())
                }
                None => Err(FlowError::Remote(format!("Workflow {} not found", id))),
            };
            state.calls.push(Call::UpdateWorkflow {
                id: id.into(),
                body,
            });
            result
        };
        Box::pin(async move { response })
    }

    fn delete_workflow(&self, id: &str) -> BoxFuture<'_, Result<()>> {
        let response = {
            let mut state = self.state();
            state.calls.push(Call::DeleteWorkflow(id.into()));
            state
                .workflows
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| FlowError::Remote(format!("Workflow {} not found", id)))
        };
        Box::pin(async move { response })
    }
}
