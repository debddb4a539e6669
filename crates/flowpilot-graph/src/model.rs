use std::collections::HashSet;

use flowpilot_core::{
    Connection, FlowError, Node, NodeConfig, NodeKind, Position, Result, Workflow,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::sanitizer::sanitize;
use crate::validator::{self, Decision, Question, SourceRef};

/// Nodes and connections of the workflow being edited.
///
/// Every mutation either succeeds completely or leaves the graph untouched.
/// Labels are unique and never empty; node ids are unique; no connection
/// references a missing node.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    /// Cached copy of the selected node, kept in step with `nodes`.
    selected: Option<Node>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a stored document.
    ///
    /// Nodes must satisfy the id and label invariants; connections whose
    /// endpoints are missing are dropped.
    pub fn from_workflow(workflow: &Workflow) -> Result<Self> {
        let mut graph = Self::new();
        for node in &workflow.nodes {
            graph.insert_node(node.clone())?;
        }
        for conn in &workflow.connections {
            if graph.node(&conn.source).is_none() || graph.node(&conn.target).is_none() {
                warn!(connection = %conn.id, "Dropping connection with a missing endpoint");
                continue;
            }
            graph.connections.push(conn.clone());
        }
        Ok(graph)
    }

    /// Stored form of the graph, with connections sanitized.
    pub fn to_workflow(&self, name: impl Into<String>) -> Workflow {
        Workflow {
            name: name.into(),
            nodes: self.nodes.clone(),
            connections: self.sanitized_connections(),
            status: None,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connections as they must leave the editor.
    pub fn sanitized_connections(&self) -> Vec<Connection> {
        sanitize(&self.connections, &self.nodes)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether any node depends on the remote scheduler.
    pub fn has_scheduling_node(&self) -> bool {
        self.nodes.iter().any(|n| n.kind().is_scheduling())
    }

    pub fn scheduling_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind().is_scheduling())
    }

    fn label_taken(&self, label: &str, except: Option<&str>) -> bool {
        self.nodes
            .iter()
            .any(|n| n.label == label && Some(n.id.as_str()) != except)
    }

    /// Add a node of `kind` with default config, labeled by its display name.
    pub fn add_node(&mut self, kind: NodeKind, position: Position) -> &Node {
        let base = kind.display_name();
        let mut label = base.to_string();
        let mut n = 2;
        while self.label_taken(&label, None) {
            label = format!("{} {}", base, n);
            n += 1;
        }

        let node = Node::of_kind(format!("node-{}", Uuid::new_v4().simple()), label, kind)
            .with_position(position);
        debug!(node_id = %node.id, kind = %kind, label = %node.label, "Node added");
        self.nodes.push(node);
        &self.nodes[self.nodes.len() - 1]
    }

    /// Add an existing node, enforcing the id and label invariants.
    pub fn insert_node(&mut self, mut node: Node) -> Result<()> {
        let label = node.label.trim();
        if label.is_empty() {
            return Err(FlowError::EmptyLabel);
        }
        if self.node(&node.id).is_some() {
            return Err(FlowError::DuplicateNodeId(node.id));
        }
        if self.label_taken(label, None) {
            return Err(FlowError::DuplicateLabel(label.to_string()));
        }
        node.label = label.to_string();
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node and every connection touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<Node> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))?;

        let node = self.nodes.remove(index);
        let before = self.connections.len();
        self.connections.retain(|c| !c.touches(id));
        if self.selected.as_ref().is_some_and(|s| s.id == id) {
            self.selected = None;
        }
        debug!(
            node_id = %id,
            connections_removed = before - self.connections.len(),
            "Node removed"
        );
        Ok(node)
    }

    pub fn remove_connection(&mut self, id: &str) -> Result<Connection> {
        let index = self
            .connections
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| FlowError::ConnectionNotFound(id.to_string()))?;
        Ok(self.connections.remove(index))
    }

    /// Rename a node. The label is trimmed and must be unique and non-empty.
    pub fn rename_label(&mut self, id: &str, new_label: &str) -> Result<()> {
        let label = new_label.trim();
        if label.is_empty() {
            return Err(FlowError::EmptyLabel);
        }
        if self.label_taken(label, Some(id)) {
            return Err(FlowError::DuplicateLabel(label.to_string()));
        }
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))?;

        node.label = label.to_string();
        let updated = node.clone();
        self.refresh_selected(updated);
        Ok(())
    }

    /// Replace a node's configuration. The variant must match the node kind.
    pub fn update_config(&mut self, id: &str, config: NodeConfig) -> Result<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))?;
        if node.kind() != config.kind() {
            return Err(FlowError::InvalidConfig {
                kind: node.kind().to_string(),
                message: format!("got {} config", config.kind()),
            });
        }

        node.config = config;
        let updated = node.clone();
        self.refresh_selected(updated);
        Ok(())
    }

    pub fn select(&mut self, id: &str) -> Result<()> {
        let node = self
            .node(id)
            .cloned()
            .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))?;
        self.selected = Some(node);
        Ok(())
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&Node> {
        self.selected.as_ref()
    }

    fn refresh_selected(&mut self, updated: Node) {
        if let Some(selected) = self.selected.as_mut() {
            if selected.id == updated.id {
                *selected = updated;
            }
        }
    }

    /// Run the validator for an edge without changing anything.
    pub fn propose_connection(&self, source: &SourceRef, target: &str) -> Result<Decision> {
        let source_node = self
            .node(source.node_id())
            .ok_or_else(|| FlowError::NodeNotFound(source.node_id().to_string()))?;
        if self.node(target).is_none() {
            return Err(FlowError::NodeNotFound(target.to_string()));
        }
        if let Some(branch) = source.branch() {
            if !source_node.kind().is_conditional() {
                return Err(FlowError::InvalidPort {
                    node_id: source_node.id.clone(),
                    port: branch.to_string(),
                });
            }
        }

        Ok(validator::propose_connection(
            source,
            target,
            &self.connections,
            source_node.config.goto_enabled(),
        ))
    }

    /// Propose an edge and carry out the decision, asking `confirm` when the
    /// policy needs a human answer.
    ///
    /// Returns the created connection, `None` when a question was declined
    /// with no fallback, or `ConnectionRejected` when the policy forbids it.
    pub fn connect_with<F>(
        &mut self,
        source: &SourceRef,
        target: &str,
        mut confirm: F,
    ) -> Result<Option<Connection>>
    where
        F: FnMut(&Question) -> bool,
    {
        let decision = match self.propose_connection(source, target)? {
            Decision::AskUser(question) => match question.answer(confirm(&question)) {
                Some(next) => next,
                None => {
                    debug!(source = %source, target = %target, "Goto conversion declined");
                    return Ok(None);
                }
            },
            other => other,
        };

        let label = match decision {
            Decision::Create(label) => label,
            Decision::CreateAsGoto(label) => Some(label),
            Decision::Reject(reason) => {
                return Err(FlowError::ConnectionRejected {
                    from: source.to_string(),
                    target: target.to_string(),
                    reason,
                })
            }
            Decision::AskUser(_) => None,
        };

        let conn = Connection::new(source.node_id(), target, label);
        debug!(connection = %conn.id, label = ?conn.label(), "Connection added");
        self.connections.push(conn.clone());
        Ok(Some(conn))
    }

    /// Non-interactive connect: every question is answered "no".
    pub fn add_connection(&mut self, source: &SourceRef, target: &str) -> Result<Option<Connection>> {
        self.connect_with(source, target, |_| false)
    }

    /// Empty canvas.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.connections.clear();
        self.selected = None;
    }
}

/// Label invariant violations in a node list, in node order.
pub fn check_labels(nodes: &[Node]) -> Vec<FlowError> {
    let mut seen = HashSet::new();
    let mut problems = Vec::new();
    for node in nodes {
        let label = node.label.trim();
        if label.is_empty() {
            problems.push(FlowError::EmptyLabel);
        } else if !seen.insert(label) {
            problems.push(FlowError::DuplicateLabel(label.to_string()));
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core::Branch;
    use flowpilot_test_utils::fixtures;

    fn branching() -> WorkflowGraph {
        WorkflowGraph::from_workflow(&fixtures::branching_workflow()).unwrap()
    }

    fn labels(graph: &WorkflowGraph) -> Vec<String> {
        graph.nodes().iter().map(|n| n.label.clone()).collect()
    }

    #[test]
    fn test_add_node_dedups_labels() {
        let mut graph = WorkflowGraph::new();
        let a = graph.add_node(NodeKind::Email, Position::default()).id.clone();
        graph.add_node(NodeKind::Email, Position::default());
        graph.add_node(NodeKind::Email, Position::new(10.0, 20.0));

        assert_eq!(labels(&graph), vec!["Send Email", "Send Email 2", "Send Email 3"]);
        assert_eq!(graph.nodes()[2].position, Position::new(10.0, 20.0));
        assert!(a.starts_with("node-"));
        assert!(check_labels(graph.nodes()).is_empty());
    }

    #[test]
    fn test_insert_node_enforces_invariants() {
        let mut graph = WorkflowGraph::new();
        graph.insert_node(Node::of_kind("n1", "  Fetch ", NodeKind::Webhook)).unwrap();
        assert_eq!(graph.node("n1").unwrap().label, "Fetch");

        assert!(matches!(
            graph.insert_node(Node::of_kind("n1", "Other", NodeKind::Webhook)),
            Err(FlowError::DuplicateNodeId(_))
        ));
        assert!(matches!(
            graph.insert_node(Node::of_kind("n2", "Fetch", NodeKind::Webhook)),
            Err(FlowError::DuplicateLabel(_))
        ));
        assert!(matches!(
            graph.insert_node(Node::of_kind("n3", "   ", NodeKind::Webhook)),
            Err(FlowError::EmptyLabel)
        ));
        assert_eq!(graph.nodes().len(), 1);
    }

    #[test]
    fn test_rename_to_taken_label_is_rejected() {
        let mut graph = branching();
        let before = labels(&graph);

        let err = graph.rename_label("B", "Decide").unwrap_err();
        assert!(matches!(err, FlowError::DuplicateLabel(ref l) if l == "Decide"));
        assert!(err.is_validation());
        assert_eq!(labels(&graph), before);

        assert!(matches!(graph.rename_label("B", "  "), Err(FlowError::EmptyLabel)));
        assert_eq!(labels(&graph), before);
    }

    #[test]
    fn test_rename_updates_selected_view() {
        let mut graph = branching();
        graph.select("B").unwrap();
        graph.rename_label("B", " Summarize ").unwrap();

        assert_eq!(graph.node("B").unwrap().label, "Summarize");
        assert_eq!(graph.selected().unwrap().label, "Summarize");

        // Renaming a node to its own label is allowed.
        graph.rename_label("B", "Summarize").unwrap();
    }

    #[test]
    fn test_remove_node_cascades() {
        let mut graph = branching();
        graph.select("A").unwrap();
        graph.remove_node("A").unwrap();

        assert!(graph.node("A").is_none());
        assert!(graph.connections().iter().all(|c| !c.touches("A")));
        assert!(graph.selected().is_none());
        assert!(matches!(graph.remove_node("A"), Err(FlowError::NodeNotFound(_))));
    }

    #[test]
    fn test_remove_connection() {
        let mut graph = branching();
        let id = graph.connections()[0].id.clone();
        graph.remove_connection(&id).unwrap();
        assert_eq!(graph.connections().len(), 1);
        assert!(matches!(
            graph.remove_connection(&id),
            Err(FlowError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_connect_back_to_conditional_from_plain_node() {
        let mut graph = branching();
        let before = graph.connections().len();

        let err = graph
            .connect_with(&SourceRef::node("B"), "A", |_| panic!("no question expected"))
            .unwrap_err();
        assert!(matches!(
            &err,
            FlowError::ConnectionRejected { from, target, .. } if from == "B" && target == "A"
        ));
        assert!(err.to_string().starts_with("Connection B -> A rejected: "));
        assert_eq!(graph.connections().len(), before);
    }

    #[test]
    fn test_self_loop_from_branch_port() {
        let mut graph = branching();
        let source = SourceRef::port("A", Branch::True);

        assert_eq!(graph.connect_with(&source, "A", |_| false).unwrap(), None);

        let conn = graph.connect_with(&source, "A", |_| true).unwrap().unwrap();
        assert_eq!(conn.label(), Some("true:goto"));
        assert!(conn.is_goto());
    }

    #[test]
    fn test_branch_port_on_plain_node() {
        let graph = branching();
        assert!(matches!(
            graph.propose_connection(&SourceRef::port("B", Branch::False), "C"),
            Err(FlowError::InvalidPort { .. })
        ));
        assert!(matches!(
            graph.propose_connection(&SourceRef::node("B"), "missing"),
            Err(FlowError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_goto_enabled_node_asks_first() {
        let mut graph = branching();
        graph.update_config("A", fixtures::if_else_config(true)).unwrap();

        let mut asked = 0;
        let conn = graph
            .connect_with(&SourceRef::port("A", Branch::False), "B", |_| {
                asked += 1;
                false
            })
            .unwrap()
            .unwrap();
        assert_eq!(asked, 1);
        assert_eq!(conn.label(), Some("false"));
    }

    #[test]
    fn test_update_config_kind_must_match() {
        let mut graph = branching();
        graph.select("A").unwrap();
        let err = graph
            .update_config("A", NodeConfig::default_for(NodeKind::Timer))
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig { .. }));

        graph.update_config("A", fixtures::if_else_config(true)).unwrap();
        assert!(graph.selected().unwrap().config.goto_enabled());
    }

    #[test]
    fn test_from_workflow_drops_dangling_connections() {
        let mut workflow = fixtures::branching_workflow();
        workflow.connections.push(Connection::new("A", "ghost", None));
        let graph = WorkflowGraph::from_workflow(&workflow).unwrap();
        assert_eq!(graph.connections().len(), 2);
    }

    #[test]
    fn test_to_workflow_sanitizes() {
        let mut graph = branching();
        graph.insert_node(Node::of_kind("D", "Log it", NodeKind::Database)).unwrap();
        graph.add_connection(&SourceRef::node("A"), "D").unwrap();

        let workflow = graph.to_workflow("Demo");
        assert_eq!(workflow.name, "Demo");
        let healed = workflow.connections.iter().find(|c| c.target == "D").unwrap();
        assert_eq!(healed.label(), Some("true"));
        // The editor copy keeps the raw edge.
        assert!(graph.connections().iter().any(|c| c.target == "D" && !c.has_label()));
    }

    #[test]
    fn test_check_labels() {
        let nodes = vec![
            Node::of_kind("a", "Same", NodeKind::Join),
            Node::of_kind("b", "Same", NodeKind::Join),
            Node::of_kind("c", "", NodeKind::Join),
        ];
        let problems = check_labels(&nodes);
        assert_eq!(problems.len(), 2);
        assert!(matches!(problems[0], FlowError::DuplicateLabel(_)));
        assert!(matches!(problems[1], FlowError::EmptyLabel));
    }

    #[test]
    fn test_clear() {
        let mut graph = branching();
        graph.select("C").unwrap();
        graph.clear();
        assert!(graph.is_empty());
        assert!(graph.connections().is_empty());
        assert!(graph.selected().is_none());
    }
}
