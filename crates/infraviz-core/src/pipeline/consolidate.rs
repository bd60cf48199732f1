//! Parent/child consolidation.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::diagnostics::Diagnostics;
use crate::graph::ResourceGraph;
use crate::provider::ProviderContext;
use crate::rules::ConsolidationMode;

/// Attribute listing the ids merged into a node.
pub const CONSOLIDATED_ATTR: &str = "consolidated";

pub(crate) fn run(graph: &mut ResourceGraph, ctx: &ProviderContext, diagnostics: &mut Diagnostics) {
    for rule in &ctx.rules().consolidate {
        for child_pattern in &rule.children {
            for child in ctx.nodes_matching(graph, child_pattern) {
                // an earlier fold in this loop may have consumed it
                let Some(node) = graph.node(&child) else {
                    continue;
                };
                if rule.parent.matches(&child, &node.resource_type) {
                    continue;
                }
                let parents: Vec<String> = graph
                    .neighbors(&child)
                    .into_iter()
                    .filter(|n| {
                        graph
                            .node(n)
                            .is_some_and(|p| rule.parent.matches(n, &p.resource_type) && ctx.owns(p))
                    })
                    .collect();
                if parents.is_empty() {
                    diagnostics.info(
                        Some(child.as_str()),
                        format!("no adjacent `{}` to consolidate into", rule.parent),
                    );
                    continue;
                }
                match rule.mode {
                    ConsolidationMode::Fold => merge_into(graph, &child, &parents),
                    ConsolidationMode::Adopt => adopt(graph, &child, &parents),
                }
            }
        }
    }
}

/// Redirect every edge of `child` to each of `parents`, record the merge on
/// the parents and delete the child. Edges between the child and a parent
/// are dropped.
pub(crate) fn merge_into(graph: &mut ResourceGraph, child: &str, parents: &[String]) {
    let parent_set: BTreeSet<&str> = parents.iter().map(String::as_str).collect();
    let inbound: Vec<(String, Option<String>)> = graph
        .predecessors(child)
        .into_iter()
        .map(|p| {
            let label = graph.edge_label(&p, child).map(str::to_string);
            (p, label)
        })
        .collect();
    let outbound: Vec<(String, Option<String>)> = graph
        .successors(child)
        .into_iter()
        .map(|s| {
            let label = graph.edge_label(child, &s).map(str::to_string);
            (s, label)
        })
        .collect();
    let mut merged: BTreeSet<String> = consolidated_ids(graph, child);
    merged.insert(child.to_string());

    for parent in parents {
        for (pred, label) in &inbound {
            if !parent_set.contains(pred.as_str()) {
                graph.add_edge(pred, parent, label.as_deref());
            }
        }
        for (succ, label) in &outbound {
            if !parent_set.contains(succ.as_str()) {
                graph.add_edge(parent, succ, label.as_deref());
            }
        }
        record_consolidated(graph, parent, &merged);
    }
    graph.remove_node(child);
}

/// Turn `child -> parent` references into `parent -> child` containment.
fn adopt(graph: &mut ResourceGraph, child: &str, parents: &[String]) {
    for parent in parents {
        if graph.contains_edge(child, parent) {
            let label = graph.edge_label(child, parent).map(str::to_string);
            graph.remove_edge(child, parent);
            graph.add_edge(parent, child, label.as_deref());
        }
    }
}

fn consolidated_ids(graph: &ResourceGraph, id: &str) -> BTreeSet<String> {
    graph
        .node(id)
        .and_then(|n| n.attributes.get(CONSOLIDATED_ATTR))
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn record_consolidated(graph: &mut ResourceGraph, parent: &str, merged: &BTreeSet<String>) {
    let mut ids = consolidated_ids(graph, parent);
    ids.extend(merged.iter().cloned());
    if let Some(node) = graph.node_mut(parent) {
        node.attributes.insert(
            CONSOLIDATED_ATTR.to_string(),
            Value::Array(ids.into_iter().map(Value::String).collect()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Attributes, NodeRef};
    use crate::provider::ProviderRegistry;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> ResourceGraph {
        let mut g = ResourceGraph::new();
        for id in nodes {
            let ty = NodeRef::parse(id).resource_type.to_string();
            g.add_node(id, &ty, Attributes::new());
        }
        for (a, b) in edges {
            g.add_edge(a, b, None);
        }
        g
    }

    #[test]
    fn fold_redirects_external_edges() {
        let registry = ProviderRegistry::with_builtin();
        let aws = registry.context("aws");
        let mut g = graph(
            &[
                "aws_lb.web",
                "aws_lb_listener.https",
                "aws_acm_certificate.cert",
                "aws_route53_record.www",
            ],
            &[
                ("aws_lb_listener.https", "aws_lb.web"),
                ("aws_lb_listener.https", "aws_acm_certificate.cert"),
                ("aws_route53_record.www", "aws_lb_listener.https"),
            ],
        );
        run(&mut g, &aws, &mut Diagnostics::new());

        assert!(!g.contains_node("aws_lb_listener.https"));
        assert!(g.contains_edge("aws_lb.web", "aws_acm_certificate.cert"));
        assert!(g.contains_edge("aws_route53_record.www", "aws_lb.web"));
        assert_eq!(
            g.node("aws_lb.web").unwrap().attributes[CONSOLIDATED_ATTR],
            serde_json::json!(["aws_lb_listener.https"])
        );
    }

    #[test]
    fn adopt_keeps_child_under_parent() {
        let registry = ProviderRegistry::with_builtin();
        let aws = registry.context("aws");
        let mut g = graph(
            &["aws_efs_file_system.fs", "aws_efs_mount_target.a"],
            &[("aws_efs_mount_target.a", "aws_efs_file_system.fs")],
        );
        run(&mut g, &aws, &mut Diagnostics::new());
        assert!(g.contains_edge("aws_efs_file_system.fs", "aws_efs_mount_target.a"));
        assert!(!g.contains_edge("aws_efs_mount_target.a", "aws_efs_file_system.fs"));
    }

    #[test]
    fn orphan_child_is_left_alone() {
        let registry = ProviderRegistry::with_builtin();
        let aws = registry.context("aws");
        let mut g = graph(&["aws_lb_listener.lonely"], &[]);
        let mut diag = Diagnostics::new();
        run(&mut g, &aws, &mut diag);
        assert!(g.contains_node("aws_lb_listener.lonely"));
        assert_eq!(diag.len(), 1);
    }

    #[test]
    fn merge_accumulates_nested_consolidations() {
        let mut g = graph(&["a.parent", "b.child"], &[("b.child", "a.parent")]);
        g.node_mut("b.child").unwrap().attributes.insert(
            CONSOLIDATED_ATTR.to_string(),
            serde_json::json!(["c.grandchild"]),
        );
        merge_into(&mut g, "b.child", &["a.parent".to_string()]);
        assert_eq!(
            g.node("a.parent").unwrap().attributes[CONSOLIDATED_ATTR],
            serde_json::json!(["b.child", "c.grandchild"])
        );
        assert_eq!(g.edge_count(), 0);
    }
}
