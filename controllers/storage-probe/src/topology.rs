//! Node selection for mount probes
//!
//! Evaluates a [`ProbeNodeSelector`] against live Nodes the same way the
//! scheduler evaluates required node affinity.

use crds::{NodeSelectorOperator, NodeSelectorRequirement, ProbeNodeSelector, ProbeNodeSelectorTerm};
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeSet;

/// Names of the nodes that should carry a mount probe.
///
/// Nodes already being deleted are left out.
#[must_use]
pub fn topology_snapshot(selector: &ProbeNodeSelector, nodes: &[Node]) -> BTreeSet<String> {
    nodes
        .iter()
        .filter(|node| node.metadata.deletion_timestamp.is_none())
        .filter(|node| node_matches(selector, node))
        .filter_map(|node| node.metadata.name.clone())
        .collect()
}

/// Terms are ORed; an empty term list selects every node.
#[must_use]
pub fn node_matches(selector: &ProbeNodeSelector, node: &Node) -> bool {
    selector.node_selector_terms.is_empty()
        || selector.node_selector_terms.iter().any(|term| term_matches(term, node))
}

/// Requirements are ANDed; a term without requirements matches nothing.
fn term_matches(term: &ProbeNodeSelectorTerm, node: &Node) -> bool {
    if term.match_expressions.is_empty() && term.match_fields.is_empty() {
        return false;
    }
    let labels = node.metadata.labels.as_ref();
    term.match_expressions
        .iter()
        .all(|req| requirement_matches(req, labels.and_then(|l| l.get(&req.key)).map(String::as_str)))
        && term
            .match_fields
            .iter()
            .all(|req| requirement_matches(req, field_value(node, &req.key)))
}

fn field_value<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    match key {
        "metadata.name" => node.metadata.name.as_deref(),
        _ => None,
    }
}

fn requirement_matches(req: &NodeSelectorRequirement, value: Option<&str>) -> bool {
    match req.operator {
        NodeSelectorOperator::In => value.is_some_and(|v| req.values.iter().any(|x| x == v)),
        NodeSelectorOperator::NotIn => value.is_none_or(|v| !req.values.iter().any(|x| x == v)),
        NodeSelectorOperator::Exists => value.is_some(),
        NodeSelectorOperator::DoesNotExist => value.is_none(),
        NodeSelectorOperator::Gt => compare(req, value).is_some_and(|(v, bound)| v > bound),
        NodeSelectorOperator::Lt => compare(req, value).is_some_and(|(v, bound)| v < bound),
    }
}

/// Gt/Lt take exactly one integer value
fn compare(req: &NodeSelectorRequirement, value: Option<&str>) -> Option<(i64, i64)> {
    let [bound] = req.values.as_slice() else {
        return None;
    };
    Some((value?.parse().ok()?, bound.parse().ok()?))
}
