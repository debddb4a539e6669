//! Workflow documents on disk.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;

use flowpilot_core::Workflow;
use flowpilot_graph::{check_labels, sanitize};

pub fn read_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing workflow {}", path.display()))
}

pub fn write_workflow(path: &Path, workflow: &Workflow) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(workflow)?;
    std::fs::write(path, body).with_context(|| format!("writing workflow {}", path.display()))
}

/// Findings of `flowpilot validate`.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub label_problems: Vec<String>,
    /// Connections that reference a node missing from the document.
    pub dangling: Vec<String>,
    /// Conditional edges the sanitizer would label `true`.
    pub healed: Vec<String>,
    pub goto_edges: Vec<String>,
}

impl ValidationReport {
    pub fn check(workflow: &Workflow) -> Self {
        let ids: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
        let dangling = workflow
            .connections
            .iter()
            .filter(|c| !ids.contains(c.source.as_str()) || !ids.contains(c.target.as_str()))
            .map(|c| format!("{} ({} -> {})", c.id, c.source, c.target))
            .collect();

        let healed = sanitize(&workflow.connections, &workflow.nodes)
            .iter()
            .zip(&workflow.connections)
            .filter(|(after, before)| after.label() != before.label())
            .map(|(after, _)| format!("{} ({} -> {})", after.id, after.source, after.target))
            .collect();

        let goto_edges = workflow
            .connections
            .iter()
            .filter(|c| c.is_goto())
            .map(|c| format!("{} -> {} [{}]", c.source, c.target, c.label().unwrap_or_default()))
            .collect();

        Self {
            label_problems: check_labels(&workflow.nodes)
                .into_iter()
                .map(|e| e.to_string())
                .collect(),
            dangling,
            healed,
            goto_edges,
        }
    }

    /// No problem that would stop the document from loading.
    pub fn is_loadable(&self) -> bool {
        self.label_problems.is_empty()
    }

    pub fn print(&self) {
        if self.label_problems.is_empty() {
            println!("Labels: ok");
        } else {
            println!("Label problems:");
            for problem in &self.label_problems {
                println!("  - {}", problem);
            }
        }
        if !self.dangling.is_empty() {
            println!("Dangling connections (dropped on load):");
            for conn in &self.dangling {
                println!("  - {}", conn);
            }
        }
        if !self.healed.is_empty() {
            println!("Unlabeled conditional edges (sent as 'true'):");
            for conn in &self.healed {
                println!("  - {}", conn);
            }
        }
        if !self.goto_edges.is_empty() {
            println!("Goto edges:");
            for conn in &self.goto_edges {
                println!("  - {}", conn);
            }
        }
    }
}
