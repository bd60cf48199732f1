use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PipelineError};
use crate::graph::{Node, ResourceGraph};
use crate::pattern::ResourcePattern;
use crate::rules::RuleBundle;
use crate::service_mapping::{ServiceCategory, ServiceMapping};

// --- Descriptors ---

/// Where a provider's rule bundle comes from.
#[derive(Debug, Clone)]
pub enum ConfigLocator {
    /// JSON compiled into the crate.
    Embedded(&'static str),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    /// Lowercase id, e.g. `aws`.
    pub name: String,
    pub resource_type_prefixes: Vec<String>,
    pub config: ConfigLocator,
    pub aliases: Vec<String>,
}

impl ProviderDescriptor {
    pub fn new(name: &str, prefixes: &[&str], config: ConfigLocator) -> Self {
        Self {
            name: name.to_lowercase(),
            resource_type_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            config,
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_lowercase()).collect();
        self
    }

    pub fn aws() -> Self {
        Self::new(
            "aws",
            &["aws_", "tv_aws_"],
            ConfigLocator::Embedded(include_str!("../providers/aws.json")),
        )
        .with_aliases(&["amazon", "hashicorp/aws"])
    }

    pub fn azure() -> Self {
        Self::new(
            "azure",
            &["azurerm_", "azuread_", "azapi_", "tv_azure_"],
            ConfigLocator::Embedded(include_str!("../providers/azure.json")),
        )
        .with_aliases(&["azurerm", "hashicorp/azurerm"])
    }

    pub fn gcp() -> Self {
        Self::new(
            "gcp",
            &["google_", "tv_gcp_"],
            ConfigLocator::Embedded(include_str!("../providers/gcp.json")),
        )
        .with_aliases(&["google", "hashicorp/google"])
    }

    /// Whether `name` is this provider's name or one of its aliases,
    /// ignoring case.
    pub fn answers_to(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        self.name == name || self.aliases.iter().any(|a| *a == name)
    }

    /// Length of the longest prefix of `resource_type` this provider claims.
    fn prefix_len(&self, resource_type: &str) -> Option<usize> {
        self.resource_type_prefixes
            .iter()
            .filter(|p| resource_type.starts_with(p.as_str()))
            .map(String::len)
            .max()
    }
}

/// Planner hints arrive as `registry.terraform.io/hashicorp/aws`,
/// `hashicorp/aws` or `aws`.
fn hint_names(hint: &str) -> Vec<&str> {
    let hint = hint.trim();
    let mut names = vec![hint];
    let slashes: Vec<usize> = hint.match_indices('/').map(|(i, _)| i).collect();
    if let Some(&last) = slashes.last() {
        names.push(&hint[last + 1..]);
    }
    if slashes.len() >= 2 {
        names.push(&hint[slashes[slashes.len() - 2] + 1..]);
    }
    names
}

// --- Context ---

/// A provider's descriptor together with its loaded rules. Everything a
/// pass needs to know about a provider is read from here.
#[derive(Debug)]
pub struct ProviderContext {
    descriptor: Arc<ProviderDescriptor>,
    rules: RuleBundle,
    // names and aliases of the other registered providers
    others: Vec<String>,
    rivals: Vec<Rival>,
}

/// Another registered provider's type prefixes, as seen from one context.
#[derive(Debug)]
struct Rival {
    prefixes: Vec<String>,
    // registered first, so it takes equal-length prefixes
    earlier: bool,
}

impl Rival {
    fn outranks(&self, resource_type: &str, own_len: usize) -> bool {
        self.prefixes
            .iter()
            .filter(|p| resource_type.starts_with(p.as_str()))
            .any(|p| p.len() > own_len || (self.earlier && p.len() == own_len))
    }
}

impl ProviderContext {
    pub fn new(descriptor: Arc<ProviderDescriptor>, rules: RuleBundle) -> Self {
        Self {
            descriptor,
            rules,
            others: Vec::new(),
            rivals: Vec::new(),
        }
    }

    /// Empty rules; categories come from the shared mapping only.
    pub fn generic(name: &str) -> Self {
        Self::new(
            Arc::new(ProviderDescriptor::new(name, &[], ConfigLocator::Embedded("{}"))),
            RuleBundle::default(),
        )
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn rules(&self) -> &RuleBundle {
        &self.rules
    }

    /// Whether passes running for this provider may touch `node`.
    pub fn owns(&self, node: &Node) -> bool {
        if let Some(hint) = &node.provider_hint {
            let names = hint_names(hint);
            if names.iter().any(|n| self.descriptor.answers_to(n)) {
                return true;
            }
            if names.iter().any(|n| self.others.iter().any(|o| o == &n.to_lowercase())) {
                return false;
            }
        }
        // same longest-prefix rule as `ProviderRegistry::provider_for`
        let Some(own_len) = self.descriptor.prefix_len(&node.resource_type) else {
            return false;
        };
        !self.rivals.iter().any(|r| r.outranks(&node.resource_type, own_len))
    }

    pub fn category(&self, resource_type: &str) -> Option<ServiceCategory> {
        self.rules
            .categories
            .get(resource_type)
            .copied()
            .or_else(|| ServiceMapping::global().category(resource_type))
    }

    pub fn canonical_type<'a>(&'a self, resource_type: &'a str) -> &'a str {
        self.rules
            .type_aliases
            .get(resource_type)
            .map(String::as_str)
            .unwrap_or(resource_type)
    }

    /// First display variant whose attribute contains the configured text.
    pub fn variant_for(&self, node: &Node) -> Option<&str> {
        let rules = self.rules.variants.get(&node.resource_type)?;
        rules
            .iter()
            .find(|rule| {
                node.attributes.get(&rule.attribute).is_some_and(|value| match value {
                    serde_json::Value::String(s) => s.contains(&rule.contains),
                    other => other.to_string().contains(&rule.contains),
                })
            })
            .map(|rule| rule.variant.as_str())
    }

    /// Sort key, background first. Listed prefixes come before every
    /// unlisted type; unlisted types are ordered by their category layer.
    pub fn draw_rank(&self, resource_type: &str) -> usize {
        let listed = &self.rules.draw_order;
        if let Some(pos) = listed.iter().position(|p| resource_type.starts_with(p.as_str())) {
            return pos;
        }
        let layer = self
            .category(resource_type)
            .map_or(usize::from(u8::MAX), |c| usize::from(c.layer()));
        listed.len() + layer
    }

    pub fn is_group_type(&self, resource_type: &str) -> bool {
        self.rules
            .group_types
            .iter()
            .any(|p| p.matches_type(resource_type))
    }

    /// Owned nodes matching `pattern`, lexicographic.
    pub fn nodes_matching(&self, graph: &ResourceGraph, pattern: &ResourcePattern) -> Vec<String> {
        graph
            .nodes()
            .filter(|(id, node)| pattern.matches(id, &node.resource_type) && self.owns(node))
            .map(|(id, _)| id.to_string())
            .collect()
    }
}

// --- Registry ---

/// Outcome of provider detection over one graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// Detected providers, most resources first.
    pub providers: Vec<String>,
    pub primary: String,
    pub counts: BTreeMap<String, usize>,
    /// Nodes no provider claims. They stay in the graph.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unclassified: Vec<String>,
}

/// Registered providers plus their lazily loaded contexts. Each context is
/// loaded at most once per registry, even under concurrent first use.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    descriptors: Vec<Arc<ProviderDescriptor>>,
    overrides_dir: Option<PathBuf>,
    contexts: Mutex<HashMap<String, Arc<OnceLock<Arc<ProviderContext>>>>>,
    loads: AtomicUsize,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `aws`, `azure` and `gcp` with their embedded bundles.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ProviderDescriptor::aws());
        registry.register(ProviderDescriptor::azure());
        registry.register(ProviderDescriptor::gcp());
        registry
    }

    /// Built-in providers, with per-user overrides from
    /// [`default_overrides_dir`](Self::default_overrides_dir).
    pub fn from_environment() -> Self {
        Self::with_builtin().with_overrides_dir(Self::default_overrides_dir())
    }

    /// `~/.infraviz/providers`
    pub fn default_overrides_dir() -> PathBuf {
        crate::config_dir().join("providers")
    }

    /// `<dir>/<provider>.json`, when present, replaces the provider's bundle.
    pub fn with_overrides_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.overrides_dir = Some(dir.into());
        self
    }

    /// Add a provider, replacing any registered under the same name.
    pub fn register(&mut self, descriptor: ProviderDescriptor) {
        self.descriptors.retain(|d| d.name != descriptor.name);
        self.descriptors.push(Arc::new(descriptor));
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.descriptors.iter().map(|d| d.as_ref())
    }

    /// Look a provider up by name or alias, ignoring case.
    pub fn descriptor(&self, name: &str) -> Option<&Arc<ProviderDescriptor>> {
        self.descriptors.iter().find(|d| d.answers_to(name))
    }

    /// The provider a node belongs to: its planner hint when that names a
    /// registered provider, otherwise the longest matching type prefix.
    /// Equal prefixes go to the provider registered first.
    pub fn provider_for(&self, node: &Node) -> Option<&str> {
        if let Some(hint) = &node.provider_hint {
            for name in hint_names(hint) {
                if let Some(d) = self.descriptor(name) {
                    return Some(&d.name);
                }
            }
        }
        let mut best: Option<(usize, &ProviderDescriptor)> = None;
        for d in &self.descriptors {
            if let Some(len) = d.prefix_len(&node.resource_type) {
                if best.map_or(true, |(best_len, _)| len > best_len) {
                    best = Some((len, d));
                }
            }
        }
        best.map(|(_, d)| d.name.as_str())
    }

    pub fn detect(&self, graph: &ResourceGraph) -> Result<Detection, PipelineError> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut unclassified = Vec::new();
        for (id, node) in graph.nodes() {
            match self.provider_for(node) {
                Some(name) => *counts.entry(name.to_string()).or_default() += 1,
                None => unclassified.push(id.to_string()),
            }
        }

        let mut providers: Vec<String> = counts.keys().cloned().collect();
        providers.sort_by(|a, b| counts[b].cmp(&counts[a]).then_with(|| a.cmp(b)));
        let Some(primary) = providers.first().cloned() else {
            return Err(PipelineError::NoProviderDetected {
                node_count: graph.node_count(),
                known_prefixes: self.known_prefixes(),
            });
        };
        if !unclassified.is_empty() {
            tracing::debug!(count = unclassified.len(), "resources without a provider");
        }
        tracing::info!(primary = %primary, providers = ?providers, "detected providers");
        Ok(Detection {
            providers,
            primary,
            counts,
            unclassified,
        })
    }

    fn known_prefixes(&self) -> String {
        let mut prefixes: Vec<&str> = self
            .descriptors
            .iter()
            .flat_map(|d| d.resource_type_prefixes.iter().map(String::as_str))
            .collect();
        prefixes.sort_unstable();
        if prefixes.is_empty() {
            return "none".to_string();
        }
        prefixes.join(", ")
    }

    /// The provider's context, loading it on first use. Unknown providers
    /// and unreadable bundles yield a context with default rules.
    pub fn context(&self, name: &str) -> Arc<ProviderContext> {
        let canonical = match self.descriptor(name) {
            Some(d) => d.name.clone(),
            None => name.trim().to_lowercase(),
        };
        let cell = {
            let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
            contexts
                .entry(canonical.clone())
                .or_insert_with(|| Arc::new(OnceLock::new()))
                .clone()
        };
        cell.get_or_init(|| Arc::new(self.load(&canonical))).clone()
    }

    /// Number of context loads performed so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn load(&self, name: &str) -> ProviderContext {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let Some(descriptor) = self.descriptor(name).cloned() else {
            tracing::info!(provider = name, "unknown provider, using generic rules");
            return ProviderContext::generic(name);
        };
        let rules = match self.read_bundle(&descriptor) {
            Ok((rules, source)) => {
                tracing::info!(provider = name, source = %source, "loaded provider rules");
                rules
            }
            Err(err) => {
                tracing::warn!(provider = name, error = %err, "provider rules unusable, using defaults");
                RuleBundle::default()
            }
        };
        let others = self
            .descriptors
            .iter()
            .filter(|d| d.name != descriptor.name)
            .flat_map(|d| std::iter::once(d.name.clone()).chain(d.aliases.iter().cloned()))
            .collect();
        let position = self.descriptors.iter().position(|d| d.name == descriptor.name);
        let rivals = self
            .descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.name != descriptor.name)
            .map(|(i, d)| Rival {
                prefixes: d.resource_type_prefixes.clone(),
                earlier: position.is_some_and(|own| i < own),
            })
            .collect();
        ProviderContext {
            descriptor,
            rules,
            others,
            rivals,
        }
    }

    fn read_bundle(&self, descriptor: &ProviderDescriptor) -> Result<(RuleBundle, String), ConfigError> {
        if let Some(dir) = &self.overrides_dir {
            let path = dir.join(format!("{}.json", descriptor.name));
            if path.is_file() {
                let raw = read_file(&path)?;
                return Ok((RuleBundle::from_json(&raw)?, path.display().to_string()));
            }
        }
        match &descriptor.config {
            ConfigLocator::Embedded(raw) => Ok((RuleBundle::from_json(raw)?, "embedded".to_string())),
            ConfigLocator::File(path) => {
                let raw = read_file(path)?;
                Ok((RuleBundle::from_json(&raw)?, path.display().to_string()))
            }
        }
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
