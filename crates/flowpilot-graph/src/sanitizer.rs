use std::collections::HashSet;

use flowpilot_core::{Branch, Connection, Node};
use tracing::warn;

/// Give every unlabeled edge leaving a conditional node the `true` label.
///
/// Runs right before a connection set is persisted or sent for execution.
/// All other edges pass through untouched.
pub fn sanitize(connections: &[Connection], nodes: &[Node]) -> Vec<Connection> {
    let conditional: HashSet<&str> = nodes
        .iter()
        .filter(|n| n.kind().is_conditional())
        .map(|n| n.id.as_str())
        .collect();

    connections
        .iter()
        .map(|conn| {
            if conditional.contains(conn.source.as_str()) && !conn.has_label() {
                warn!(
                    connection = %conn.id,
                    source = %conn.source,
                    "Conditional edge has no branch label, defaulting to 'true'"
                );
                conn.clone().with_label(Branch::True.as_str())
            } else {
                conn.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core::{ConnectionData, NodeKind};
    use proptest::prelude::*;

    fn nodes() -> Vec<Node> {
        vec![
            Node::of_kind("if1", "Check", NodeKind::IfElse),
            Node::of_kind("g1", "Ask", NodeKind::Gigachat),
            Node::of_kind("e1", "Mail", NodeKind::Email),
        ]
    }

    #[test]
    fn test_unlabeled_conditional_edge_gets_true() {
        let conns = vec![
            Connection::new("if1", "g1", None),
            Connection::new("if1", "e1", Some("false".into())),
        ];
        let out = sanitize(&conns, &nodes());
        assert_eq!(out[0].label(), Some("true"));
        assert_eq!(out[0].id, conns[0].id);
        assert_eq!(out[1].label(), Some("false"));
    }

    #[test]
    fn test_empty_label_counts_as_missing() {
        let mut conn = Connection::new("if1", "g1", None);
        conn.data = Some(ConnectionData {
            label: Some(String::new()),
        });
        assert_eq!(sanitize(&[conn], &nodes())[0].label(), Some("true"));
    }

    #[test]
    fn test_plain_edges_untouched() {
        let conns = vec![Connection::new("g1", "e1", None)];
        assert_eq!(sanitize(&conns, &nodes()), conns);
    }

    fn arb_connections() -> impl Strategy<Value = Vec<Connection>> {
        let ids = prop::sample::select(vec!["if1", "g1", "e1", "ghost"]);
        let labels = prop::option::of(prop::sample::select(vec!["true", "false", "true:goto", ""]));
        prop::collection::vec((ids.clone(), ids, labels), 0..16).prop_map(|raw| {
            raw.into_iter()
                .map(|(s, t, l)| Connection::new(s, t, l.map(str::to_string)))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn test_sanitize_is_idempotent(conns in arb_connections()) {
            let nodes = nodes();
            let once = sanitize(&conns, &nodes);
            let twice = sanitize(&once, &nodes);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_plain_sources_never_gain_labels(conns in arb_connections()) {
            let out = sanitize(&conns, &nodes());
            for (before, after) in conns.iter().zip(&out) {
                if before.source != "if1" {
                    prop_assert_eq!(before, after);
                } else {
                    prop_assert!(after.has_label());
                }
            }
        }
    }
}
