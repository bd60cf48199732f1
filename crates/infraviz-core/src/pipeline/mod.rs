//! The ordered transformation pipeline.
//!
//! Handlers, transitive links, consolidation and expansion run once per
//! detected provider, primary first, each touching only the nodes that
//! provider owns. Annotations and dedup then run over the whole graph.

mod consolidate;
mod dedup;
mod expand;
pub mod handlers;
mod linking;
pub mod transforms;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::annotations::{AnnotationDocument, Overlay, PinnedEdges};
use crate::diagnostics::Diagnostics;
use crate::error::PipelineError;
use crate::graph::ResourceGraph;
use crate::pattern::ResourcePattern;
use crate::provider::{Detection, ProviderContext, ProviderRegistry};

pub use consolidate::CONSOLIDATED_ATTR;
pub use handlers::{BuiltinHandler, Handler, HandlerScope, HandlerStep, ZONE_SUFFIX_ATTR};
pub use transforms::TransformOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Handlers,
    TransitiveLinks,
    Consolidation,
    Expansion,
    Annotations,
    Dedup,
}

impl PassKind {
    pub const ALL: [PassKind; 6] = [
        PassKind::Handlers,
        PassKind::TransitiveLinks,
        PassKind::Consolidation,
        PassKind::Expansion,
        PassKind::Annotations,
        PassKind::Dedup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PassKind::Handlers => "handlers",
            PassKind::TransitiveLinks => "transitive_links",
            PassKind::Consolidation => "consolidation",
            PassKind::Expansion => "expansion",
            PassKind::Annotations => "annotations",
            PassKind::Dedup => "dedup",
        }
    }

    /// Passes that run once per provider.
    pub fn is_per_provider(&self) -> bool {
        matches!(
            self,
            PassKind::Handlers | PassKind::TransitiveLinks | PassKind::Consolidation | PassKind::Expansion
        )
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON dump of the graph after one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub pass: PassKind,
    pub graph: String,
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub graph: ResourceGraph,
    pub detection: Detection,
    pub diagnostics: Diagnostics,
    /// Visible node ids, background first.
    pub draw_order: Vec<String>,
    pub snapshots: Vec<Snapshot>,
}

pub struct Pipeline<'a> {
    registry: &'a ProviderRegistry,
    annotations: Option<AnnotationDocument>,
    snapshots: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a ProviderRegistry) -> Self {
        Self {
            registry,
            annotations: None,
            snapshots: false,
        }
    }

    /// User overlay, applied after every automatic pass.
    pub fn with_annotations(mut self, document: AnnotationDocument) -> Self {
        self.annotations = Some(document);
        self
    }

    pub fn with_snapshots(mut self, enabled: bool) -> Self {
        self.snapshots = enabled;
        self
    }

    /// Detect providers, validate the overlay, then run every pass. Nothing
    /// is mutated when a fatal condition is found.
    pub fn run(&self, graph: ResourceGraph) -> Result<PipelineOutput, PipelineError> {
        let detection = self.registry.detect(&graph)?;
        let overlay = self.compile_overlay()?;
        let contexts: Vec<Arc<ProviderContext>> = detection
            .providers
            .iter()
            .map(|name| self.registry.context(name))
            .collect();
        Ok(self.transform(graph, detection, &contexts, overlay.as_ref()))
    }

    /// Split the graph by provider and run one pipeline per provider in
    /// parallel. Nodes no provider claims travel with the primary provider.
    pub fn run_per_provider(&self, graph: ResourceGraph) -> Result<Vec<PipelineOutput>, PipelineError> {
        let detection = self.registry.detect(&graph)?;
        let overlay = self.compile_overlay()?;

        let parts: Vec<(String, ResourceGraph)> = detection
            .providers
            .iter()
            .map(|name| {
                let is_primary = *name == detection.primary;
                let part = graph.subgraph(|_, node| match self.registry.provider_for(node) {
                    Some(owner) => owner == name,
                    None => is_primary,
                });
                (name.clone(), part)
            })
            .collect();

        let outputs: Vec<PipelineOutput> = std::thread::scope(|scope| {
            let handles: Vec<_> = parts
                .into_iter()
                .map(|(name, part)| {
                    let overlay = overlay.as_ref();
                    let detection = Detection {
                        providers: vec![name.clone()],
                        primary: name.clone(),
                        counts: BTreeMap::from([(
                            name.clone(),
                            detection.counts.get(&name).copied().unwrap_or(0),
                        )]),
                        unclassified: detection
                            .unclassified
                            .iter()
                            .filter(|id| part.contains_node(id))
                            .cloned()
                            .collect(),
                    };
                    scope.spawn(move || {
                        let ctx = self.registry.context(&name);
                        self.transform(part, detection, &[ctx], overlay)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });
        Ok(outputs)
    }

    fn compile_overlay(&self) -> Result<Option<Overlay>, PipelineError> {
        Ok(self.annotations.as_ref().map(AnnotationDocument::compile).transpose()?)
    }

    fn transform(
        &self,
        mut graph: ResourceGraph,
        detection: Detection,
        contexts: &[Arc<ProviderContext>],
        overlay: Option<&Overlay>,
    ) -> PipelineOutput {
        let mut diagnostics = Diagnostics::new();
        let mut snapshots = Vec::new();
        let defaults = default_overlays(contexts, &mut diagnostics);
        let mut pinned = PinnedEdges::new();

        for pass in PassKind::ALL {
            diagnostics.enter(pass);
            match pass {
                PassKind::Handlers => {
                    for ctx in contexts {
                        run_handlers(&mut graph, ctx, &mut diagnostics);
                    }
                }
                PassKind::TransitiveLinks => {
                    for ctx in contexts {
                        linking::run(&mut graph, ctx, &mut diagnostics);
                    }
                }
                PassKind::Consolidation => {
                    for ctx in contexts {
                        consolidate::run(&mut graph, ctx, &mut diagnostics);
                    }
                }
                PassKind::Expansion => {
                    for ctx in contexts {
                        expand::run(&mut graph, ctx, &mut diagnostics);
                    }
                }
                PassKind::Annotations => {
                    for (when, defaults) in &defaults {
                        if graph.nodes().any(|(id, n)| when.matches(id, &n.resource_type)) {
                            defaults.apply(&mut graph, &mut diagnostics);
                        }
                    }
                    // the user overlay goes last so it wins
                    if let Some(overlay) = overlay {
                        pinned = overlay.apply(&mut graph, &mut diagnostics);
                    }
                }
                PassKind::Dedup => dedup::run(&mut graph, contexts, &pinned, &mut diagnostics),
            }
            if self.snapshots {
                take_snapshot(&graph, pass, &mut snapshots, &mut diagnostics);
            }
            tracing::info!(
                pass = %pass,
                nodes = graph.node_count(),
                edges = graph.edge_count(),
                "pass complete"
            );
        }
        diagnostics.leave();

        let draw_order = draw_order(&graph, self.registry, contexts);
        PipelineOutput {
            graph,
            detection,
            diagnostics,
            draw_order,
            snapshots,
        }
    }
}

fn run_handlers(graph: &mut ResourceGraph, ctx: &ProviderContext, diagnostics: &mut Diagnostics) {
    for registration in &ctx.rules().handlers {
        let scope = HandlerScope {
            ctx,
            pattern: &registration.resource,
        };
        for step in &registration.steps {
            step.apply(graph, &scope, diagnostics);
        }
    }
}

/// Provider overlays keyed by the pattern that triggers them. A default
/// overlay that does not compile is reported and skipped.
fn default_overlays(
    contexts: &[Arc<ProviderContext>],
    diagnostics: &mut Diagnostics,
) -> Vec<(ResourcePattern, Overlay)> {
    let mut compiled = Vec::new();
    for ctx in contexts {
        for auto in &ctx.rules().default_annotations {
            match auto.overlay.compile() {
                Ok(overlay) => compiled.push((auto.when.clone(), overlay)),
                Err(err) => diagnostics.warn(
                    None,
                    format!("{}: default annotations for `{}` skipped: {}", ctx.name(), auto.when, err),
                ),
            }
        }
    }
    compiled
}

fn take_snapshot(
    graph: &ResourceGraph,
    pass: PassKind,
    snapshots: &mut Vec<Snapshot>,
    diagnostics: &mut Diagnostics,
) {
    match graph.to_json_pretty() {
        Ok(json) => snapshots.push(Snapshot { pass, graph: json }),
        Err(err) => diagnostics.warn(None, format!("snapshot after {} failed: {}", pass, err)),
    }
}

/// Visible nodes sorted background first, by the owning provider's draw
/// rank and then by id.
fn draw_order(
    graph: &ResourceGraph,
    registry: &ProviderRegistry,
    contexts: &[Arc<ProviderContext>],
) -> Vec<String> {
    let Some(primary) = contexts.first() else {
        return Vec::new();
    };
    let mut ranked: Vec<(usize, &str)> = graph
        .nodes()
        .filter(|(_, node)| !node.hidden)
        .map(|(id, node)| {
            let ctx = registry
                .provider_for(node)
                .and_then(|name| contexts.iter().find(|c| c.name() == name))
                .unwrap_or(primary);
            (ctx.draw_rank(&node.resource_type), id)
        })
        .collect();
    ranked.sort();
    ranked.into_iter().map(|(_, id)| id.to_string()).collect()
}
