use futures::future::BoxFuture;

use crate::error::Result;
use crate::node::Node;
use crate::protocol::*;
use crate::types::{TimerRecord, Workflow, WorkflowSummary};

/// Remote execution service. Runs nodes, reports results, owns schedules.
///
/// Dropping a returned future abandons the request; the server may still
/// finish the work.
pub trait ExecutionService: Send + Sync + 'static {
    /// Liveness probe (`GET /health`).
    fn health(&self) -> BoxFuture<'_, Result<HealthResponse>>;

    /// Run a whole graph and return its results and ordered log batch.
    fn execute_workflow(
        &self,
        request: ExecuteWorkflowRequest,
    ) -> BoxFuture<'_, Result<ExecuteWorkflowResponse>>;

    /// Run a single node in isolation.
    fn execute_node(&self, request: ExecuteNodeRequest)
        -> BoxFuture<'_, Result<ExecuteNodeResponse>>;

    /// Latest known result snapshot for the given nodes.
    fn node_status(&self, node_ids: Vec<String>) -> BoxFuture<'_, Result<NodeStatusResponse>>;

    fn list_timers(&self) -> BoxFuture<'_, Result<Vec<TimerRecord>>>;

    fn pause_timer(&self, timer_id: &str) -> BoxFuture<'_, Result<()>>;

    fn resume_timer(&self, timer_id: &str) -> BoxFuture<'_, Result<()>>;

    fn delete_timer(&self, timer_id: &str) -> BoxFuture<'_, Result<()>>;

    /// Fire a schedule immediately.
    fn execute_timer_now(&self, timer_id: &str) -> BoxFuture<'_, Result<ExecuteWorkflowResponse>>;

    /// Attach the schedule described by a timer node to a stored workflow.
    fn setup_timer(&self, node: Node, workflow_id: &str) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Durable workflow storage.
pub trait WorkflowStore: Send + Sync + 'static {
    fn list_workflows(&self) -> BoxFuture<'_, Result<Vec<WorkflowSummary>>>;

    fn get_workflow(&self, id: &str) -> BoxFuture<'_, Result<Workflow>>;

    /// Store a new workflow and return its durable id.
    fn create_workflow(&self, name: &str, body: WorkflowBody) -> BoxFuture<'_, Result<String>>;

    fn update_workflow(&self, id: &str, body: WorkflowBody) -> BoxFuture<'_, Result<()>>;

    fn delete_workflow(&self, id: &str) -> BoxFuture<'_, Result<()>>;
}
