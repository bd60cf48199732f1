//! Multi-instance expansion: one resource placed in several parents
//! becomes one numbered instance per parent.

use std::collections::BTreeSet;

use crate::diagnostics::Diagnostics;
use crate::graph::{base_id, instance_id, instance_index, ResourceGraph};
use crate::pattern::ResourcePattern;
use crate::provider::ProviderContext;

pub(crate) fn run(graph: &mut ResourceGraph, ctx: &ProviderContext, diagnostics: &mut Diagnostics) {
    for rule in &ctx.rules().expand {
        for id in ctx.nodes_matching(graph, &rule.resource) {
            expand_node(graph, &id, &rule.parent, diagnostics);
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Out,
    In,
}

/// Split `id` into `id~1..n` when it is adjacent to `n >= 2` nodes matching
/// `parent`. Instance `k` belongs to the `k`-th parent in id order. Returns
/// whether the node was expanded.
pub(crate) fn expand_node(
    graph: &mut ResourceGraph,
    id: &str,
    parent: &ResourcePattern,
    diagnostics: &mut Diagnostics,
) -> bool {
    if instance_index(id).is_some() {
        return false;
    }
    let Some(node) = graph.node(id).cloned() else {
        return false;
    };
    let parents: Vec<String> = graph
        .neighbors(id)
        .into_iter()
        .filter(|n| {
            graph
                .node(n)
                .is_some_and(|p| parent.matches(n, &p.resource_type))
        })
        .collect();
    if parents.len() < 2 {
        return false;
    }

    let parent_labels: Vec<Option<String>> = parents.iter().map(|p| graph.link_label(p, id)).collect();
    let mut others: Vec<(String, Direction, Option<String>)> = Vec::new();
    for succ in graph.successors(id) {
        if !parents.contains(&succ) {
            let label = graph.edge_label(id, &succ).map(str::to_string);
            others.push((succ, Direction::Out, label));
        }
    }
    for pred in graph.predecessors(id) {
        if !parents.contains(&pred) {
            let label = graph.edge_label(&pred, id).map(str::to_string);
            others.push((pred, Direction::In, label));
        }
    }

    graph.remove_node(id);
    let count = parents.len();
    // x~j pairs with instance j only when x is numbered exactly 1..=count;
    // any other numbered neighbour fans out like an unnumbered one
    let paired: Vec<bool> = others
        .iter()
        .map(|(other, _, _)| instance_index(other).is_some() && numbered_one_to(graph, base_id(other), count))
        .collect();
    for (k, (parent_id, label)) in parents.iter().zip(parent_labels).enumerate() {
        let index = k as u32 + 1;
        let instance = instance_id(id, index);
        graph.insert_node(&instance, node.clone());
        graph.add_edge(parent_id, &instance, label.as_deref());

        for ((other, direction, label), &paired) in others.iter().zip(&paired) {
            if paired && instance_index(other) != Some(index) {
                continue;
            }
            match direction {
                Direction::Out => graph.add_edge(&instance, other, label.as_deref()),
                Direction::In => graph.add_edge(other, &instance, label.as_deref()),
            };
        }
    }
    diagnostics.info(
        Some(id),
        format!("expanded into {} instances across `{}`", count, parent),
    );
    true
}

fn numbered_one_to(graph: &ResourceGraph, base: &str, count: usize) -> bool {
    let indices: BTreeSet<u32> = graph
        .nodes()
        .filter(|(n, _)| base_id(n) == base)
        .filter_map(|(n, _)| instance_index(n))
        .collect();
    indices.len() == count && indices.iter().copied().eq(1..=count as u32)
}
