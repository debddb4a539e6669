use std::path::PathBuf;

use chrono::{Duration, Utc};
use flowpilot_core::node::IfElseConfig;
use flowpilot_core::protocol::{ExecuteWorkflowResponse, NodeStatusResponse, RemoteLogEntry};
use flowpilot_core::{
    Connection, Node, NodeConfig, NodeKind, ResultMap, TimerRecord, TimerStatus, Workflow,
};
use serde_json::Value;
use tempfile::TempDir;

/// `A` (if/else) branches to `B` on true and `C` on false.
pub fn branching_workflow() -> Workflow {
    Workflow {
        name: "Branching".into(),
        nodes: vec![
            Node::of_kind("A", "Decide", NodeKind::IfElse),
            Node::of_kind("B", "Ask", NodeKind::Gigachat),
            Node::of_kind("C", "Notify", NodeKind::Email),
        ],
        connections: vec![
            Connection::new("A", "B", Some("true".into())),
            Connection::new("A", "C", Some("false".into())),
        ],
        status: None,
    }
}

/// `T` (timer) feeds `G`.
pub fn timer_workflow() -> Workflow {
    Workflow {
        name: "Scheduled".into(),
        nodes: vec![
            Node::of_kind("T", "Every five", NodeKind::Timer),
            Node::of_kind("G", "Ask", NodeKind::Gigachat),
        ],
        connections: vec![Connection::new("T", "G", None)],
        status: None,
    }
}

/// Plain chain `n1 -> n2 -> n3`.
pub fn linear_workflow() -> Workflow {
    Workflow {
        name: "Linear".into(),
        nodes: vec![
            Node::of_kind("n1", "Ask", NodeKind::Gigachat),
            Node::of_kind("n2", "Post", NodeKind::Webhook),
            Node::of_kind("n3", "Store", NodeKind::Database),
        ],
        connections: vec![
            Connection::new("n1", "n2", None),
            Connection::new("n2", "n3", None),
        ],
        status: None,
    }
}

pub fn if_else_config(enable_goto: bool) -> NodeConfig {
    NodeConfig::IfElse(IfElseConfig {
        enable_goto,
        ..Default::default()
    })
}

pub fn timer_record(id: &str, node_id: &str, status: TimerStatus) -> TimerRecord {
    TimerRecord {
        id: id.into(),
        node_id: node_id.into(),
        interval_minutes: 5,
        next_execution: Utc::now() + Duration::minutes(5),
        status,
    }
}

pub fn remote_log(node_id: &str, level: &str, message: &str) -> RemoteLogEntry {
    RemoteLogEntry {
        node_id: Some(node_id.into()),
        level: level.into(),
        message: message.into(),
        timestamp: None,
        data: None,
    }
}

pub fn results(entries: &[(&str, Value)]) -> ResultMap {
    entries
        .iter()
        .map(|(id, value)| (id.to_string(), value.clone()))
        .collect()
}

pub fn success_response(result: ResultMap, logs: Vec<RemoteLogEntry>) -> ExecuteWorkflowResponse {
    ExecuteWorkflowResponse {
        success: true,
        result: Some(result),
        logs,
        error: None,
    }
}

pub fn failure_response(error: Option<&str>) -> ExecuteWorkflowResponse {
    ExecuteWorkflowResponse {
        success: false,
        result: None,
        logs: Vec::new(),
        error: error.map(str::to_string),
    }
}

/// `/node-status` payload with a `result` for each entry.
pub fn status_response(entries: &[(&str, Value)]) -> NodeStatusResponse {
    NodeStatusResponse {
        results: entries
            .iter()
            .map(|(id, value)| (id.to_string(), serde_json::json!({ "result": value })))
            .collect(),
    }
}

/// Write a workflow document into a fresh temp dir.
pub fn temp_workflow_file(workflow: &Workflow) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("workflow.json");
    let body = serde_json::to_string_pretty(workflow).expect("encode workflow");
    std::fs::write(&path, body).expect("write workflow file");
    (dir, path)
}
