//! User-authored overlay applied after every automatic pass.
//!
//! The document is parsed into [`AnnotationDocument`], checked and compiled
//! into an [`Overlay`] before the pipeline mutates anything, then applied as
//! the annotation pass.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::error::AnnotationError;
use crate::graph::{Attributes, NodeRef, ResourceGraph};
use crate::pattern::ResourcePattern;

/// Edges explicitly created or labelled by an overlay. Later passes never
/// remove them.
pub type PinnedEdges = BTreeSet<(String, String)>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AnnotationDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Source pattern → targets to connect.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connect: BTreeMap<String, Vec<EdgeTarget>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub disconnect: BTreeMap<String, Vec<EdgeTarget>>,
    /// New `type.name` → attributes. A `label` attribute sets the node label.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, Option<Attributes>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub update: BTreeMap<String, NodeUpdate>,
}

/// `target` or `{target: label}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum EdgeTarget {
    Plain(String),
    Labeled(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    /// `[{target: label}]` for existing outbound edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge_labels: Vec<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl AnnotationDocument {
    pub fn from_yaml(raw: &str) -> Result<Self, AnnotationError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Check the document's structure and resolve every pattern.
    pub fn compile(&self) -> Result<Overlay, AnnotationError> {
        let mut additions = Vec::with_capacity(self.add.len());
        for (id, attrs) in &self.add {
            let pattern = ResourcePattern::parse(id)?;
            if !pattern.is_exact_id() {
                return Err(AnnotationError::malformed(
                    "add",
                    format!("`{}` must be a `type.name` resource id without wildcards", id),
                ));
            }
            let mut attributes = attrs.clone().unwrap_or_default();
            let label = match attributes.remove("label") {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(other) => Some(other.to_string()),
                None => None,
            };
            additions.push(Addition {
                resource_type: NodeRef::parse(id).resource_type.to_string(),
                id: pattern.as_str().to_string(),
                label,
                attributes,
            });
        }

        let removals = self
            .remove
            .iter()
            .map(|raw| ResourcePattern::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let connections = compile_edges("connect", &self.connect)?;
        let disconnections = compile_edges("disconnect", &self.disconnect)?;

        let mut updates = Vec::with_capacity(self.update.len());
        for (raw, update) in &self.update {
            if update == &NodeUpdate::default() {
                return Err(AnnotationError::malformed(
                    "update",
                    format!("`{}` does not change anything", raw),
                ));
            }
            let mut edge_labels = Vec::new();
            for entry in &update.edge_labels {
                let (target, label) = single_entry("update", raw, entry)?;
                edge_labels.push((ResourcePattern::parse(target)?, label.to_string()));
            }
            updates.push(UpdateRule {
                pattern: ResourcePattern::parse(raw)?,
                label: update.label.clone(),
                hidden: update.hidden,
                attributes: update.attributes.clone(),
                edge_labels,
            });
        }

        Ok(Overlay {
            title: self.title.clone(),
            additions,
            removals,
            connections,
            disconnections,
            updates,
        })
    }
}

fn compile_edges(
    section: &str,
    entries: &BTreeMap<String, Vec<EdgeTarget>>,
) -> Result<Vec<EdgeRule>, AnnotationError> {
    let mut rules = Vec::with_capacity(entries.len());
    for (source, targets) in entries {
        if targets.is_empty() {
            return Err(AnnotationError::malformed(
                section,
                format!("`{}` lists no targets", source),
            ));
        }
        let mut compiled = Vec::with_capacity(targets.len());
        for target in targets {
            match target {
                EdgeTarget::Plain(t) => compiled.push((ResourcePattern::parse(t)?, None)),
                EdgeTarget::Labeled(map) => {
                    let (t, label) = single_entry(section, source, map)?;
                    compiled.push((ResourcePattern::parse(t)?, Some(label.to_string())));
                }
            }
        }
        rules.push(EdgeRule {
            source: ResourcePattern::parse(source)?,
            targets: compiled,
        });
    }
    Ok(rules)
}

fn single_entry<'a>(
    section: &str,
    owner: &str,
    map: &'a BTreeMap<String, String>,
) -> Result<(&'a str, &'a str), AnnotationError> {
    let mut iter = map.iter();
    match (iter.next(), iter.next()) {
        (Some((target, label)), None) => Ok((target.as_str(), label.as_str())),
        _ => Err(AnnotationError::malformed(
            section,
            format!(
                "labelled target under `{}` must be a single `target: label` entry",
                owner
            ),
        )),
    }
}

// --- Compiled overlay ---

#[derive(Debug, Clone)]
struct Addition {
    id: String,
    resource_type: String,
    label: Option<String>,
    attributes: Attributes,
}

#[derive(Debug, Clone)]
struct EdgeRule {
    source: ResourcePattern,
    targets: Vec<(ResourcePattern, Option<String>)>,
}

#[derive(Debug, Clone)]
struct UpdateRule {
    pattern: ResourcePattern,
    label: Option<String>,
    hidden: Option<bool>,
    attributes: Attributes,
    edge_labels: Vec<(ResourcePattern, String)>,
}

/// A validated annotation document, ready to apply.
#[derive(Debug, Clone)]
pub struct Overlay {
    title: Option<String>,
    additions: Vec<Addition>,
    removals: Vec<ResourcePattern>,
    connections: Vec<EdgeRule>,
    disconnections: Vec<EdgeRule>,
    updates: Vec<UpdateRule>,
}

impl Overlay {
    /// Apply in order: title, add, remove, connect, disconnect, update.
    /// Patterns that match nothing are reported, never fatal.
    pub fn apply(&self, graph: &mut ResourceGraph, diagnostics: &mut Diagnostics) -> PinnedEdges {
        let mut pinned = PinnedEdges::new();

        if let Some(title) = &self.title {
            graph.set_title(Some(title.clone()));
        }

        for add in &self.additions {
            let node = graph.add_node(&add.id, &add.resource_type, add.attributes.clone());
            if add.label.is_some() {
                node.label = add.label.clone();
            }
        }

        for pattern in &self.removals {
            let ids = matching(graph, pattern, "remove", diagnostics);
            for id in ids {
                graph.remove_node(&id);
            }
        }

        for rule in &self.connections {
            let sources = matching(graph, &rule.source, "connect", diagnostics);
            for (target, label) in &rule.targets {
                let targets = matching(graph, target, "connect", diagnostics);
                for src in &sources {
                    for dst in &targets {
                        if src == dst {
                            continue;
                        }
                        graph.add_edge(src, dst, label.as_deref());
                        if label.is_some() {
                            graph.set_edge_label(src, dst, label.as_deref());
                        }
                        if graph.contains_edge(src, dst) {
                            pinned.insert((src.clone(), dst.clone()));
                        }
                    }
                }
            }
        }

        for rule in &self.disconnections {
            let sources = matching(graph, &rule.source, "disconnect", diagnostics);
            for (target, _) in &rule.targets {
                for src in &sources {
                    for dst in graph.successors(src) {
                        let matched = graph
                            .node(&dst)
                            .is_some_and(|n| target.matches(&dst, &n.resource_type));
                        if matched {
                            graph.remove_edge(src, &dst);
                            pinned.remove(&(src.clone(), dst));
                        }
                    }
                }
            }
        }

        for rule in &self.updates {
            let ids = matching(graph, &rule.pattern, "update", diagnostics);
            for id in ids {
                if let Some(node) = graph.node_mut(&id) {
                    node.attributes
                        .extend(rule.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
                    if rule.label.is_some() {
                        node.label = rule.label.clone();
                    }
                    if let Some(hidden) = rule.hidden {
                        node.hidden = hidden;
                    }
                }
                for (target, label) in &rule.edge_labels {
                    let mut hit = false;
                    for dst in graph.successors(&id) {
                        let matched = graph
                            .node(&dst)
                            .is_some_and(|n| target.matches(&dst, &n.resource_type));
                        if matched {
                            graph.set_edge_label(&id, &dst, Some(label));
                            pinned.insert((id.clone(), dst));
                            hit = true;
                        }
                    }
                    if !hit {
                        diagnostics.warn(
                            Some(id.as_str()),
                            format!("update: no outbound edge matches `{}`", target),
                        );
                    }
                }
            }
        }

        pinned
    }
}

fn matching(
    graph: &ResourceGraph,
    pattern: &ResourcePattern,
    section: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<String> {
    let ids = graph.nodes_matching(pattern);
    if ids.is_empty() {
        diagnostics.warn(None, format!("{}: `{}` matches no resources", section, pattern));
    }
    ids
}

/// JSON schema of [`AnnotationDocument`] for authoring tools.
pub fn schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(AnnotationDocument)).unwrap_or(serde_json::Value::Null)
}
