//! Connection legality: cycle detection plus the branch-label policy.
//!
//! Everything here is pure. Questions that need a human answer come back as
//! [`Decision::AskUser`] and are resolved by the caller through
//! [`Question::answer`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use flowpilot_core::{Branch, Connection};

/// Where a proposed edge starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// Any node's single output.
    Node(String),
    /// A named exit of a conditional node.
    Port { node_id: String, branch: Branch },
}

impl SourceRef {
    pub fn node(id: impl Into<String>) -> Self {
        Self::Node(id.into())
    }

    pub fn port(id: impl Into<String>, branch: Branch) -> Self {
        Self::Port {
            node_id: id.into(),
            branch,
        }
    }

    pub fn node_id(&self) -> &str {
        match self {
            Self::Node(id) => id,
            Self::Port { node_id, .. } => node_id,
        }
    }

    pub fn branch(&self) -> Option<Branch> {
        match self {
            Self::Node(_) => None,
            Self::Port { branch, .. } => Some(*branch),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => f.write_str(id),
            Self::Port { node_id, branch } => write!(f, "{}:{}", node_id, branch),
        }
    }
}

impl std::str::FromStr for SourceRef {
    type Err = std::convert::Infallible;

    /// Parses `node:true` / `node:false` as a branch port. Anything else,
    /// colons included, is a plain node id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let port = s
            .rsplit_once(':')
            .and_then(|(node_id, port)| Some((node_id, port.parse::<Branch>().ok()?)));
        Ok(match port {
            Some((node_id, branch)) => Self::port(node_id, branch),
            None => Self::node(s),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    /// The edge closes a cycle; it may only exist as a goto edge.
    OfferGoto,
    /// The node has goto enabled; the user may still pick a plain branch edge.
    ConfirmGoto,
}

/// A confirmation the caller must obtain before the edge is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question {
    pub kind: QuestionKind,
    pub branch: Branch,
}

impl Question {
    /// Follow-up decision for the user's answer. `None` means no edge.
    pub fn answer(&self, accepted: bool) -> Option<Decision> {
        match (self.kind, accepted) {
            (_, true) => Some(Decision::CreateAsGoto(self.branch.goto_label())),
            (QuestionKind::OfferGoto, false) => None,
            (QuestionKind::ConfirmGoto, false) => {
                Some(Decision::Create(Some(self.branch.as_str().to_string())))
            }
        }
    }

    /// Prompt text for interactive front-ends.
    pub fn prompt(&self) -> String {
        match self.kind {
            QuestionKind::OfferGoto => format!(
                "This connection leads back to an earlier node. Convert it into a '{}' goto edge?",
                self.branch.goto_label()
            ),
            QuestionKind::ConfirmGoto => format!(
                "Goto is enabled for this node. Create a '{}' goto edge instead of a plain '{}' edge?",
                self.branch.goto_label(),
                self.branch
            ),
        }
    }
}

/// Outcome of a connection proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Create the edge with this label (branch edges) or none.
    Create(Option<String>),
    /// Create the edge as an intentional back-edge.
    CreateAsGoto(String),
    Reject(String),
    AskUser(Question),
}

pub const CYCLE_REJECTION: &str = "cycles permitted only from conditional branch ports";

/// Whether adding `source -> target` would close a cycle.
///
/// Breadth-first search from `target` over existing edges; the edge closes a
/// cycle iff `source` is reachable. A self-loop always counts.
pub fn would_create_cycle(source: &str, target: &str, connections: &[Connection]) -> bool {
    if source == target {
        return true;
    }

    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in connections {
        outgoing
            .entry(conn.source.as_str())
            .or_default()
            .push(conn.target.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::from([target]);
    let mut queue: VecDeque<&str> = VecDeque::from([target]);

    while let Some(current) = queue.pop_front() {
        let Some(next) = outgoing.get(current) else {
            continue;
        };
        for &node in next {
            if node == source {
                return true;
            }
            if visited.insert(node) {
                queue.push_back(node);
            }
        }
    }
    false
}

/// Decide whether and how an edge from `source` to `target` may be created.
///
/// `goto_enabled` reflects the source node's configuration and only matters
/// for branch ports.
pub fn propose_connection(
    source: &SourceRef,
    target: &str,
    connections: &[Connection],
    goto_enabled: bool,
) -> Decision {
    let cycle = would_create_cycle(source.node_id(), target, connections);

    match (cycle, source.branch()) {
        (true, Some(branch)) => Decision::AskUser(Question {
            kind: QuestionKind::OfferGoto,
            branch,
        }),
        (true, None) => Decision::Reject(CYCLE_REJECTION.to_string()),
        (false, Some(branch)) if goto_enabled => Decision::AskUser(Question {
            kind: QuestionKind::ConfirmGoto,
            branch,
        }),
        (false, Some(branch)) => Decision::Create(Some(branch.as_str().to_string())),
        (false, None) => Decision::Create(None),
    }
}
