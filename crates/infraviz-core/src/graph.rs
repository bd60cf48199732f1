use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::pattern::ResourcePattern;

pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Edge targets of one source node, with an optional connector label.
pub type EdgeTargets = BTreeMap<String, Option<String>>;

// --- Node ids ---

/// Parsed view of a node id: `<type>.<name>[~<index>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef<'a> {
    pub resource_type: &'a str,
    pub name: &'a str,
    pub index: Option<u32>,
}

impl<'a> NodeRef<'a> {
    pub fn parse(id: &'a str) -> Self {
        let (base, index) = split_index(id);
        let (resource_type, name) = base.split_once('.').unwrap_or((base, ""));
        NodeRef {
            resource_type,
            name,
            index,
        }
    }
}

fn split_index(id: &str) -> (&str, Option<u32>) {
    match id.rsplit_once('~') {
        Some((base, idx)) => match idx.parse::<u32>() {
            Ok(n) => (base, Some(n)),
            Err(_) => (id, None),
        },
        None => (id, None),
    }
}

/// The id with any `~index` suffix removed.
pub fn base_id(id: &str) -> &str {
    split_index(id).0
}

/// The `~index` suffix of an expanded instance, if any.
pub fn instance_index(id: &str) -> Option<u32> {
    split_index(id).1
}

pub fn instance_id(base: &str, index: u32) -> String {
    format!("{}~{}", base, index)
}

pub fn node_id(resource_type: &str, name: &str) -> String {
    format!("{}.{}", resource_type, name)
}

// --- Model ---

/// One provisioned resource instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    /// Excluded from rendering but kept for graph integrity.
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Provider attribution from the planner, preferred over prefix detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<String>,
    /// Namespace of the reusable module the resource came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Node {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: Attributes::new(),
            hidden: false,
            label: None,
            provider_hint: None,
            module: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// String value of an attribute, if present and a string.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// A resource as yielded by the planner collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResource {
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    /// Ids of the resources this one references.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// Directed resource graph. Iteration order is always lexicographic by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGraph {
    nodes: BTreeMap<String, Node>,
    #[serde(default)]
    edges: BTreeMap<String, EdgeTargets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial graph from planner output. References to resources
    /// that are not part of the output are pruned.
    pub fn from_resources(
        resources: impl IntoIterator<Item = RawResource>,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut graph = ResourceGraph::new();
        let mut references = Vec::new();
        for res in resources {
            let id = node_id(&res.resource_type, &res.name);
            let node = graph.add_node(&id, &res.resource_type, res.attributes);
            if res.provider_hint.is_some() {
                node.provider_hint = res.provider_hint;
            }
            if res.module.is_some() {
                node.module = res.module;
            }
            for dep in res.dependencies {
                references.push((id.clone(), dep));
            }
        }
        for (src, dst) in references {
            if !graph.contains_node(&dst) {
                diagnostics.info(
                    Some(src.as_str()),
                    format!("dependency `{}` is not a known resource; reference dropped", dst),
                );
                continue;
            }
            graph.add_edge(&src, &dst, None);
        }
        graph
    }

    // --- Nodes ---

    /// Insert a node, or merge `attributes` into the existing one.
    pub fn add_node(&mut self, id: &str, resource_type: &str, attributes: Attributes) -> &mut Node {
        let node = self
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| Node::new(resource_type));
        node.attributes.extend(attributes);
        node
    }

    /// Insert or replace a node wholesale. Existing edges are kept.
    pub fn insert_node(&mut self, id: &str, node: Node) {
        self.nodes.insert(id.to_string(), node);
    }

    /// Remove a node and every edge touching it. Absent ids are a no-op.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        self.edges.remove(id);
        self.edges.retain(|_, targets| {
            targets.remove(id);
            !targets.is_empty()
        });
        Some(node)
    }

    /// Move a node to a new id, carrying its edges. When `to` already exists
    /// the two are merged: attributes of the existing node win.
    pub fn rename_node(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        let preds: Vec<(String, Option<String>)> = self
            .predecessors(from)
            .into_iter()
            .map(|p| {
                let label = self.edge_label_of(&p, from);
                (p, label)
            })
            .collect();
        let succs: Vec<(String, Option<String>)> = self
            .edges
            .get(from)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let Some(node) = self.remove_node(from) else {
            return false;
        };
        match self.nodes.get_mut(to) {
            Some(existing) => {
                for (k, v) in node.attributes {
                    existing.attributes.entry(k).or_insert(v);
                }
            }
            None => {
                self.nodes.insert(to.to_string(), node);
            }
        }
        for (p, label) in preds {
            self.add_edge(&p, to, label.as_deref());
        }
        for (s, label) in succs {
            self.add_edge(to, &s, label.as_deref());
        }
        true
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, n)| (id.as_str(), n))
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of nodes whose type starts with `type_prefix`, lexicographic.
    pub fn nodes_of_type(&self, type_prefix: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.resource_type.starts_with(type_prefix))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn nodes_matching(&self, pattern: &ResourcePattern) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(id, n)| pattern.matches(id, &n.resource_type))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Visible nodes that nothing points at.
    pub fn top_level_nodes(&self) -> Vec<String> {
        let targeted: BTreeSet<&str> = self
            .edges
            .values()
            .flat_map(|t| t.keys().map(String::as_str))
            .collect();
        self.nodes
            .iter()
            .filter(|(id, n)| !n.hidden && !targeted.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect()
    }

    // --- Edges ---

    /// Add `src -> dst`. Re-adding an existing edge is a no-op; edges to
    /// unknown nodes and self loops are refused. Returns whether an edge was
    /// created.
    pub fn add_edge(&mut self, src: &str, dst: &str, label: Option<&str>) -> bool {
        if src == dst || !self.nodes.contains_key(src) || !self.nodes.contains_key(dst) {
            return false;
        }
        let targets = self.edges.entry(src.to_string()).or_default();
        if targets.contains_key(dst) {
            return false;
        }
        targets.insert(dst.to_string(), label.map(str::to_string));
        true
    }

    pub fn remove_edge(&mut self, src: &str, dst: &str) -> bool {
        let Some(targets) = self.edges.get_mut(src) else {
            return false;
        };
        let removed = targets.remove(dst).is_some();
        if targets.is_empty() {
            self.edges.remove(src);
        }
        removed
    }

    /// Set the label of an existing edge. Returns false when the edge is absent.
    pub fn set_edge_label(&mut self, src: &str, dst: &str, label: Option<&str>) -> bool {
        match self.edges.get_mut(src).and_then(|t| t.get_mut(dst)) {
            Some(slot) => {
                *slot = label.map(str::to_string);
                true
            }
            None => false,
        }
    }

    pub fn contains_edge(&self, src: &str, dst: &str) -> bool {
        self.edges.get(src).is_some_and(|t| t.contains_key(dst))
    }

    pub fn edge_label(&self, src: &str, dst: &str) -> Option<&str> {
        self.edges.get(src)?.get(dst)?.as_deref()
    }

    fn edge_label_of(&self, src: &str, dst: &str) -> Option<String> {
        self.edge_label(src, dst).map(str::to_string)
    }

    /// Every edge as `(source, target, label)`, lexicographic.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, Option<&str>)> {
        self.edges.iter().flat_map(|(src, targets)| {
            targets
                .iter()
                .map(move |(dst, label)| (src.as_str(), dst.as_str(), label.as_deref()))
        })
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    pub fn successors(&self, id: &str) -> Vec<String> {
        self.edges
            .get(id)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn predecessors(&self, id: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, t)| t.contains_key(id))
            .map(|(src, _)| src.clone())
            .collect()
    }

    /// Nodes adjacent to `id` in either direction, lexicographic.
    pub fn neighbors(&self, id: &str) -> Vec<String> {
        let mut all: BTreeSet<String> = self.successors(id).into_iter().collect();
        all.extend(self.predecessors(id));
        all.into_iter().collect()
    }

    /// Label of the edge between `a` and `b` in whichever direction exists,
    /// preferring `a -> b`.
    pub fn link_label(&self, a: &str, b: &str) -> Option<String> {
        self.edge_label(a, b)
            .or_else(|| self.edge_label(b, a))
            .map(str::to_string)
    }

    /// Whether `b` is reachable from `a` following edge direction.
    pub fn has_path(&self, a: &str, b: &str) -> bool {
        if !self.contains_node(a) || !self.contains_node(b) {
            return false;
        }
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(a);
        while let Some(cur) = queue.pop_front() {
            let Some(targets) = self.edges.get(cur) else {
                continue;
            };
            for next in targets.keys() {
                if next == b {
                    return true;
                }
                if seen.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                }
            }
        }
        false
    }

    /// Drop edges whose endpoints no longer exist and self loops. Returns the
    /// number of edges removed.
    pub fn prune_dangling(&mut self) -> usize {
        let nodes = &self.nodes;
        let mut removed = 0;
        self.edges.retain(|src, targets| {
            if !nodes.contains_key(src) {
                removed += targets.len();
                return false;
            }
            let before = targets.len();
            targets.retain(|dst, _| dst != src && nodes.contains_key(dst));
            removed += before - targets.len();
            !targets.is_empty()
        });
        removed
    }

    // --- Whole graph ---

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: Option<String>) {
        self.title = title;
    }

    /// Copy of the nodes accepted by `keep`, with the edges between them.
    pub fn subgraph(&self, mut keep: impl FnMut(&str, &Node) -> bool) -> ResourceGraph {
        let nodes: BTreeMap<String, Node> = self
            .nodes
            .iter()
            .filter(|(id, n)| keep(id, n))
            .map(|(id, n)| (id.clone(), n.clone()))
            .collect();
        let edges = self
            .edges
            .iter()
            .filter(|(src, _)| nodes.contains_key(src.as_str()))
            .map(|(src, targets)| {
                let kept: EdgeTargets = targets
                    .iter()
                    .filter(|(dst, _)| nodes.contains_key(dst.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (src.clone(), kept)
            })
            .filter(|(_, t)| !t.is_empty())
            .collect();
        ResourceGraph {
            nodes,
            edges,
            title: self.title.clone(),
        }
    }

    /// Debug snapshot of the graph.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> ResourceGraph {
        let mut g = ResourceGraph::new();
        for id in nodes {
            let ty = NodeRef::parse(id).resource_type.to_string();
            g.add_node(id, &ty, Attributes::new());
        }
        for (a, b) in edges {
            assert!(g.add_edge(a, b, None));
        }
        g
    }

    #[test]
    fn node_ref_parses_type_name_and_index() {
        let r = NodeRef::parse("aws_elasticache_cluster.main~2");
        assert_eq!(r.resource_type, "aws_elasticache_cluster");
        assert_eq!(r.name, "main");
        assert_eq!(r.index, Some(2));
        assert_eq!(base_id("aws_subnet.a~10"), "aws_subnet.a");
        assert_eq!(instance_index("aws_subnet.a"), None);
        assert_eq!(instance_index("aws_subnet.a~x"), None);
        assert_eq!(instance_id("aws_subnet.a", 3), "aws_subnet.a~3");
    }

    #[test]
    fn add_edge_is_idempotent() {
        let mut g = graph(&["a.x", "b.y"], &[]);
        assert!(g.add_edge("a.x", "b.y", Some("uses")));
        assert!(!g.add_edge("a.x", "b.y", None));
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.edge_label("a.x", "b.y"), Some("uses"));
    }

    #[test]
    fn add_edge_refuses_missing_endpoints_and_self_loops() {
        let mut g = graph(&["a.x"], &[]);
        assert!(!g.add_edge("a.x", "b.missing", None));
        assert!(!g.add_edge("a.x", "a.x", None));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn remove_node_purges_incident_edges() {
        let mut g = graph(&["a.x", "b.y", "c.z"], &[("a.x", "b.y"), ("b.y", "c.z"), ("c.z", "a.x")]);
        assert!(g.remove_node("b.y").is_some());
        assert_eq!(g.edges().count(), 1);
        assert!(g.contains_edge("c.z", "a.x"));
        // speculative removals are silent
        assert!(g.remove_node("b.y").is_none());
        assert!(!g.remove_edge("a.x", "c.z"));
    }

    #[test]
    fn nodes_of_type_is_lexicographic() {
        let g = graph(&["aws_subnet.c", "aws_subnet.a", "aws_vpc.main", "aws_subnet.b"], &[]);
        assert_eq!(
            g.nodes_of_type("aws_subnet"),
            vec!["aws_subnet.a", "aws_subnet.b", "aws_subnet.c"]
        );
    }

    #[test]
    fn has_path_follows_direction() {
        let g = graph(&["a.1", "b.1", "c.1"], &[("a.1", "b.1"), ("b.1", "c.1")]);
        assert!(g.has_path("a.1", "c.1"));
        assert!(!g.has_path("c.1", "a.1"));
        assert!(!g.has_path("a.1", "missing.1"));
    }

    #[test]
    fn rename_moves_edges_and_merges() {
        let mut g = graph(
            &["aws_alb.web", "aws_lb.web", "aws_instance.app", "aws_route53_record.www"],
            &[("aws_route53_record.www", "aws_alb.web"), ("aws_alb.web", "aws_instance.app")],
        );
        assert!(g.rename_node("aws_alb.web", "aws_lb.web"));
        assert!(!g.contains_node("aws_alb.web"));
        assert!(g.contains_edge("aws_route53_record.www", "aws_lb.web"));
        assert!(g.contains_edge("aws_lb.web", "aws_instance.app"));
    }

    #[test]
    fn top_level_excludes_targets_and_hidden() {
        let mut g = graph(&["a.p", "b.c", "c.h"], &[("a.p", "b.c")]);
        g.node_mut("c.h").unwrap().hidden = true;
        assert_eq!(g.top_level_nodes(), vec!["a.p"]);
    }

    #[test]
    fn from_resources_drops_unknown_references() {
        let mut diag = Diagnostics::new();
        let resources = vec![
            RawResource {
                resource_type: "aws_instance".into(),
                name: "web".into(),
                attributes: Attributes::new(),
                dependencies: vec!["aws_subnet.a".into(), "aws_vpc.gone".into()],
                provider_hint: None,
                module: None,
            },
            RawResource {
                resource_type: "aws_subnet".into(),
                name: "a".into(),
                attributes: Attributes::new(),
                dependencies: vec![],
                provider_hint: Some("aws".into()),
                module: None,
            },
        ];
        let g = ResourceGraph::from_resources(resources, &mut diag);
        assert_eq!(g.node_count(), 2);
        assert!(g.contains_edge("aws_instance.web", "aws_subnet.a"));
        assert_eq!(g.edge_count(), 1);
        assert_eq!(diag.len(), 1);
        assert_eq!(g.node("aws_subnet.a").unwrap().provider_hint.as_deref(), Some("aws"));
    }

    #[test]
    fn subgraph_keeps_internal_edges_only() {
        let g = graph(&["a.1", "b.1", "c.1"], &[("a.1", "b.1"), ("b.1", "c.1")]);
        let sub = g.subgraph(|id, _| id != "c.1");
        assert_eq!(sub.node_count(), 2);
        assert_eq!(sub.edge_count(), 1);
    }
}
