//! Declarative transforms: the parameterised operations a rule bundle can
//! attach to a resource pattern without a dedicated handler.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::consolidate::merge_into;
use super::expand::expand_node;
use super::handlers::{Handler, HandlerScope};
use crate::diagnostics::Diagnostics;
use crate::graph::{base_id, instance_id, instance_index, node_id, Node, NodeRef, ResourceGraph};
use crate::pattern::ResourcePattern;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    /// Split each target placed in several `parent` nodes into numbered
    /// instances.
    ExpandAcrossParents { parent: ResourcePattern },
    /// Keep links between numbered instances only where the indices agree.
    LinkBySuffixMatch { target: ResourcePattern },
    /// Fold every target into one node. A bare name keeps the target's type.
    ConsolidateInto {
        #[serde(rename = "targetName")]
        target_name: String,
    },
    Hide,
    Remove,
}

impl Handler for TransformOp {
    fn apply(&self, graph: &mut ResourceGraph, scope: &HandlerScope<'_>, diagnostics: &mut Diagnostics) {
        match self {
            TransformOp::ExpandAcrossParents { parent } => {
                for id in scope.targets(graph) {
                    expand_node(graph, &id, parent, diagnostics);
                }
            }
            TransformOp::LinkBySuffixMatch { target } => {
                link_by_suffix_match(graph, scope, target, diagnostics)
            }
            TransformOp::ConsolidateInto { target_name } => {
                consolidate_into(graph, scope, target_name, diagnostics)
            }
            TransformOp::Hide => {
                for id in scope.targets(graph) {
                    if let Some(node) = graph.node_mut(&id) {
                        node.hidden = true;
                    }
                }
            }
            TransformOp::Remove => {
                for id in scope.targets(graph) {
                    graph.remove_node(&id);
                    diagnostics.info(Some(id.as_str()), "removed");
                }
            }
        }
    }
}

fn link_by_suffix_match(
    graph: &mut ResourceGraph,
    scope: &HandlerScope<'_>,
    target: &ResourcePattern,
    diagnostics: &mut Diagnostics,
) {
    for id in scope.targets(graph) {
        let Some(index) = instance_index(&id) else {
            continue;
        };
        // (base, outbound, label) of every mismatched instance link
        let mut relink: BTreeSet<(String, bool, Option<String>)> = BTreeSet::new();
        for neighbor in graph.neighbors(&id) {
            let matches = graph
                .node(&neighbor)
                .is_some_and(|n| target.matches(&neighbor, &n.resource_type));
            if !matches {
                continue;
            }
            match instance_index(&neighbor) {
                Some(other) if other != index => {
                    // without a same-index peer the crossed link is all there is
                    if !graph.contains_node(&instance_id(base_id(&neighbor), index)) {
                        continue;
                    }
                    let outbound = graph.contains_edge(&id, &neighbor);
                    let label = graph.link_label(&id, &neighbor);
                    graph.remove_edge(&id, &neighbor);
                    graph.remove_edge(&neighbor, &id);
                    diagnostics.info(
                        Some(id.as_str()),
                        format!("dropped link to mismatched instance `{}`", neighbor),
                    );
                    relink.insert((base_id(&neighbor).to_string(), outbound, label));
                }
                _ => {}
            }
        }
        for (base, outbound, label) in relink {
            let peer = instance_id(&base, index);
            if outbound {
                graph.add_edge(&id, &peer, label.as_deref());
            } else {
                graph.add_edge(&peer, &id, label.as_deref());
            }
        }
    }
}

fn consolidate_into(
    graph: &mut ResourceGraph,
    scope: &HandlerScope<'_>,
    target_name: &str,
    diagnostics: &mut Diagnostics,
) {
    for id in scope.targets(graph) {
        let Some(node) = graph.node(&id) else {
            continue;
        };
        let target = if target_name.contains('.') {
            target_name.to_string()
        } else {
            node_id(&node.resource_type, target_name)
        };
        if id == target {
            continue;
        }
        if !graph.contains_node(&target) {
            let mut fresh = Node::new(NodeRef::parse(&target).resource_type);
            fresh.provider_hint = node.provider_hint.clone();
            fresh.module = node.module.clone();
            graph.insert_node(&target, fresh);
        }
        merge_into(graph, &id, &[target.clone()]);
        diagnostics.info(Some(id.as_str()), format!("consolidated into `{}`", target));
    }
}
