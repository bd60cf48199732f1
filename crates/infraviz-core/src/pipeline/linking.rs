//! Transitive links across bridging resources.

use crate::diagnostics::Diagnostics;
use crate::graph::ResourceGraph;
use crate::pattern::ResourcePattern;
use crate::provider::ProviderContext;
use crate::rules::LinkRule;

pub(crate) fn run(graph: &mut ResourceGraph, ctx: &ProviderContext, diagnostics: &mut Diagnostics) {
    let mut created = 0;
    for rule in &ctx.rules().links {
        created += apply_rule(graph, ctx, rule, diagnostics);
    }
    if created > 0 {
        tracing::debug!(provider = ctx.name(), created, "derived transitive links");
    }
}

/// Link every `from` neighbour of each `via` node to every `to` neighbour.
/// The bridging node itself is kept.
fn apply_rule(
    graph: &mut ResourceGraph,
    ctx: &ProviderContext,
    rule: &LinkRule,
    diagnostics: &mut Diagnostics,
) -> usize {
    let mut created = 0;
    for via in ctx.nodes_matching(graph, &rule.via) {
        let neighbors = graph.neighbors(&via);
        let matching = |pattern: &ResourcePattern| -> Vec<String> {
            neighbors
                .iter()
                .filter(|n| {
                    graph
                        .node(n)
                        .is_some_and(|node| pattern.matches(n, &node.resource_type))
                })
                .cloned()
                .collect()
        };
        let sources = matching(&rule.from);
        let targets = matching(&rule.to);
        for src in &sources {
            for dst in &targets {
                if graph.add_edge(src, dst, rule.label.as_deref()) {
                    diagnostics.info(
                        Some(src.as_str()),
                        format!("linked to `{}` through `{}`", dst, via),
                    );
                    created += 1;
                }
            }
        }
    }
    created
}
