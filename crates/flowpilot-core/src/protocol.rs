//! Request and response shapes exchanged with the remote execution service.

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::types::{parse_timestamp, Connection, LogEntry, LogStatus, ResultMap, TimerRecord, SYSTEM_NODE};

/// Body of `POST /execute-workflow`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteWorkflowRequest {
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    #[serde(rename = "startNodeId", skip_serializing_if = "Option::is_none")]
    pub start_node_id: Option<String>,
}

/// Response of `POST /execute-workflow` and `POST /timers/{id}/execute-now`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteWorkflowResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<ResultMap>,
    #[serde(default)]
    pub logs: Vec<RemoteLogEntry>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A log line as reported by the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLogEntry {
    #[serde(rename = "nodeId", default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl RemoteLogEntry {
    /// Convert into a local log entry; missing node ids become `system`.
    pub fn into_entry(self) -> LogEntry {
        let node_id = self
            .node_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| SYSTEM_NODE.to_string());
        let mut entry = LogEntry::new(node_id, LogStatus::from_level(&self.level), self.message);
        if let Some(ts) = self.timestamp.as_deref().and_then(parse_timestamp) {
            entry = entry.with_timestamp(ts);
        }
        if let Some(data) = self.data {
            entry = entry.with_payload(data);
        }
        entry
    }
}

/// Body of `POST /execute-node?node_type=T`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteNodeRequest {
    pub node_data: Node,
    pub input_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteNodeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of `POST /node-status`.
///
/// `serde_json::Map` keeps keys sorted, which fixes the reveal order of
/// newly discovered results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatusResponse {
    #[serde(default)]
    pub results: serde_json::Map<String, serde_json::Value>,
}

impl NodeStatusResponse {
    /// `(node_id, result)` pairs; entries without a `result` field are skipped.
    pub fn into_results(self) -> Vec<(String, serde_json::Value)> {
        self.results
            .into_iter()
            .filter_map(|(id, mut status)| {
                let result = status.get_mut("result")?.take();
                Some((id, result))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimersResponse {
    #[serde(default)]
    pub timers: Vec<TimerRecord>,
}

/// Body of `POST /setup-timer`.
#[derive(Debug, Clone, Serialize)]
pub struct SetupTimerRequest {
    pub node: Node,
    pub workflow_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: String,
}

/// Body of `POST /workflows` and `PUT /workflows/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflowResponse {
    pub workflow_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowListResponse {
    #[serde(default)]
    pub workflows: Vec<crate::types::WorkflowSummary>,
}

/// FastAPI-style error body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
}
