//! Final clean-up: dangling edges and two-node cycles.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::annotations::PinnedEdges;
use crate::diagnostics::Diagnostics;
use crate::graph::ResourceGraph;
use crate::pattern::ResourcePattern;
use crate::provider::ProviderContext;

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Keep { from: String, to: String },
    Undeclared,
    Contradictory,
}

pub(crate) fn run(
    graph: &mut ResourceGraph,
    contexts: &[Arc<ProviderContext>],
    pinned: &PinnedEdges,
    diagnostics: &mut Diagnostics,
) {
    let pruned = graph.prune_dangling();
    if pruned > 0 {
        diagnostics.info(None, format!("pruned {} dangling edges", pruned));
    }

    let cycles: Vec<(String, String)> = graph
        .edges()
        .filter(|(a, b, _)| a < b && graph.contains_edge(b, a))
        .map(|(a, b, _)| (a.to_string(), b.to_string()))
        .collect();

    for (a, b) in cycles {
        let forward = (a.clone(), b.clone());
        let backward = (b.clone(), a.clone());
        if pinned.contains(&forward) && pinned.contains(&backward) {
            diagnostics.info(Some(a.as_str()), format!("two-way link with `{}` kept as annotated", b));
            continue;
        }
        let pin = if pinned.contains(&forward) {
            Some(&forward)
        } else if pinned.contains(&backward) {
            Some(&backward)
        } else {
            None
        };

        match (verdict(graph, contexts, &a, &b), pin) {
            (Verdict::Keep { from, to }, Some((pin_from, pin_to))) if *pin_from != from || *pin_to != to => {
                // the pinned edge stays and so does the declared one
                diagnostics.warn(
                    Some(pin_from.as_str()),
                    format!("annotated link to `{}` runs against the declared direction; both kept", pin_to),
                );
            }
            (Verdict::Keep { from, to }, _) => {
                graph.remove_edge(&to, &from);
                diagnostics.info(Some(from.as_str()), format!("cycle with `{}` broken", to));
            }
            (Verdict::Undeclared, _) => diagnostics.warn(
                Some(a.as_str()),
                format!("two-way link with `{}` has no declared direction; kept", b),
            ),
            (Verdict::Contradictory, _) => diagnostics.warn(
                Some(a.as_str()),
                format!("two-way link with `{}` has contradictory directions; kept", b),
            ),
        }
    }
}

fn verdict(graph: &ResourceGraph, contexts: &[Arc<ProviderContext>], a: &str, b: &str) -> Verdict {
    let is = |id: &str, pattern: &ResourcePattern| {
        graph
            .node(id)
            .is_some_and(|n| pattern.matches(id, &n.resource_type))
    };

    let mut votes: BTreeSet<(&str, &str)> = BTreeSet::new();
    for ctx in contexts {
        for rule in &ctx.rules().forced_directions {
            if is(a, &rule.from) && is(b, &rule.to) {
                votes.insert((a, b));
            }
            if is(b, &rule.from) && is(a, &rule.to) {
                votes.insert((b, a));
            }
        }
    }

    if votes.is_empty() {
        let origin = |id: &str| contexts.iter().any(|c| c.rules().forced_origin.iter().any(|p| is(id, p)));
        let destination =
            |id: &str| contexts.iter().any(|c| c.rules().forced_destination.iter().any(|p| is(id, p)));
        if origin(a) || destination(b) {
            votes.insert((a, b));
        }
        if origin(b) || destination(a) {
            votes.insert((b, a));
        }
    }

    let mut iter = votes.into_iter();
    match (iter.next(), iter.next()) {
        (None, _) => Verdict::Undeclared,
        (Some((from, to)), None) => Verdict::Keep {
            from: from.to_string(),
            to: to.to_string(),
        },
        (Some(_), Some(_)) => Verdict::Contradictory,
    }
}
