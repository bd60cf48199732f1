//! Special-case handlers run by the first pass.
//!
//! A provider registers an ordered list of steps per resource pattern. Each
//! step is either a built-in handler or a declarative transform, and every
//! step is idempotent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostics::Diagnostics;
use crate::graph::{instance_id, node_id, Attributes, NodeRef, ResourceGraph};
use crate::pattern::ResourcePattern;
use crate::provider::ProviderContext;

pub use super::transforms::TransformOp;

/// Attribute recording the zone letter(s) of a grouped subnet.
pub const ZONE_SUFFIX_ATTR: &str = "zone_suffix";

/// What a step runs against: the provider's rules and the registration
/// pattern that selected it.
pub struct HandlerScope<'a> {
    pub ctx: &'a ProviderContext,
    pub pattern: &'a ResourcePattern,
}

impl HandlerScope<'_> {
    /// Owned nodes selected by the registration, lexicographic.
    pub fn targets(&self, graph: &ResourceGraph) -> Vec<String> {
        self.ctx.nodes_matching(graph, self.pattern)
    }
}

pub trait Handler {
    fn apply(&self, graph: &mut ResourceGraph, scope: &HandlerScope<'_>, diagnostics: &mut Diagnostics);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HandlerStep {
    Builtin(BuiltinHandler),
    Transform(TransformOp),
}

impl Handler for HandlerStep {
    fn apply(&self, graph: &mut ResourceGraph, scope: &HandlerScope<'_>, diagnostics: &mut Diagnostics) {
        match self {
            HandlerStep::Builtin(handler) => handler.apply(graph, scope, diagnostics),
            HandlerStep::Transform(op) => op.apply(graph, scope, diagnostics),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "snake_case")]
pub enum BuiltinHandler {
    /// Rename legacy or alternate types to their canonical type.
    CanonicalType,
    /// Place a subnet under an availability-zone node derived from its
    /// zone attribute.
    ZoneGrouping {
        #[serde(default = "default_zone_attribute")]
        attribute: String,
        #[serde(rename = "zoneType")]
        zone_type: String,
    },
    /// Take ownership of the resources that reference this node.
    AdoptReferrers,
}

fn default_zone_attribute() -> String {
    "availability_zone".to_string()
}

impl Handler for BuiltinHandler {
    fn apply(&self, graph: &mut ResourceGraph, scope: &HandlerScope<'_>, diagnostics: &mut Diagnostics) {
        match self {
            BuiltinHandler::CanonicalType => canonical_type(graph, scope, diagnostics),
            BuiltinHandler::ZoneGrouping {
                attribute,
                zone_type,
            } => zone_grouping(graph, scope, attribute, zone_type, diagnostics),
            BuiltinHandler::AdoptReferrers => adopt_referrers(graph, scope, diagnostics),
        }
    }
}

// --- canonical_type ---

fn canonical_type(graph: &mut ResourceGraph, scope: &HandlerScope<'_>, diagnostics: &mut Diagnostics) {
    for id in scope.targets(graph) {
        let Some(node) = graph.node(&id) else {
            continue;
        };
        let canonical = scope.ctx.canonical_type(&node.resource_type);
        if canonical == node.resource_type {
            continue;
        }
        let canonical = canonical.to_string();
        let parsed = NodeRef::parse(&id);
        let mut renamed = node_id(&canonical, parsed.name);
        if let Some(index) = parsed.index {
            renamed = instance_id(&renamed, index);
        }
        if graph.rename_node(&id, &renamed) {
            if let Some(node) = graph.node_mut(&renamed) {
                node.resource_type = canonical;
            }
            diagnostics.info(Some(id.as_str()), format!("renamed to `{}`", renamed));
        }
    }
}

// --- zone_grouping ---

fn zone_grouping(
    graph: &mut ResourceGraph,
    scope: &HandlerScope<'_>,
    attribute: &str,
    zone_type: &str,
    diagnostics: &mut Diagnostics,
) {
    for subnet in scope.targets(graph) {
        let Some(zone) = graph
            .node(&subnet)
            .and_then(|n| n.attr_str(attribute))
            .map(str::to_string)
        else {
            diagnostics.info(
                Some(subnet.as_str()),
                format!("no `{}` attribute; zone grouping skipped", attribute),
            );
            continue;
        };

        let zone_id = node_id(zone_type, &sanitize(&zone));
        let mut attrs = Attributes::new();
        attrs.insert(attribute.to_string(), Value::String(zone.clone()));
        graph.add_node(&zone_id, zone_type, attrs);
        if let Some(node) = graph.node_mut(&subnet) {
            node.attributes
                .insert(ZONE_SUFFIX_ATTR.to_string(), Value::String(zone_suffix(&zone).to_string()));
        }

        // containers of the subnet now contain the zone instead
        for neighbor in graph.neighbors(&subnet) {
            if neighbor == zone_id {
                continue;
            }
            let is_container = graph.node(&neighbor).is_some_and(|n| {
                n.resource_type != zone_type
                    && scope.ctx.is_group_type(&n.resource_type)
                    && !scope.pattern.matches(&neighbor, &n.resource_type)
            });
            if !is_container {
                continue;
            }
            graph.remove_edge(&subnet, &neighbor);
            graph.remove_edge(&neighbor, &subnet);
            graph.add_edge(&neighbor, &zone_id, None);
        }
        graph.add_edge(&zone_id, &subnet, None);
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `us-east-1a` → `a`; a zone without a letter suffix is its own suffix.
fn zone_suffix(zone: &str) -> &str {
    let trimmed = zone.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    match &zone[trimmed.len()..] {
        "" => zone,
        suffix => suffix,
    }
}

// --- adopt_referrers ---

fn adopt_referrers(graph: &mut ResourceGraph, scope: &HandlerScope<'_>, diagnostics: &mut Diagnostics) {
    for id in scope.targets(graph) {
        for referrer in graph.predecessors(&id) {
            // peers selected by the same registration are never members
            let is_member = graph.node(&referrer).is_some_and(|n| {
                !scope.ctx.is_group_type(&n.resource_type)
                    && !scope.pattern.matches(&referrer, &n.resource_type)
            });
            if !is_member {
                continue;
            }
            let label = graph.edge_label(&referrer, &id).map(str::to_string);
            graph.remove_edge(&referrer, &id);
            graph.add_edge(&id, &referrer, label.as_deref());
        }

        let has_children = graph.successors(&id).iter().any(|child| {
            graph
                .node(child)
                .is_some_and(|n| {
                    !n.hidden
                        && !scope.ctx.is_group_type(&n.resource_type)
                        && !scope.pattern.matches(child, &n.resource_type)
                })
        });
        let Some(node) = graph.node_mut(&id) else {
            continue;
        };
        // group types stay visible
        if !has_children && !scope.ctx.is_group_type(&node.resource_type) && !node.hidden {
            node.hidden = true;
            diagnostics.info(Some(id.as_str()), "no members; hidden");
        }
    }
}
