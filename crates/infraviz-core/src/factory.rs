use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::graph::{Node, ResourceGraph};
use crate::provider::{ProviderContext, ProviderRegistry};
use crate::service_mapping::ServiceCategory;

/// Drawn when nothing more specific is known.
pub const BLANK_CLASS: &str = "generic.blank.Blank";

const DEFAULT_CAPACITY: usize = 256;

/// Which step of the fallback chain produced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderableKind {
    Group,
    Concrete,
    Category,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderableDescriptor {
    pub class: String,
    pub kind: RenderableKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ServiceCategory>,
    pub provider: String,
}

// --- Cache ---

type CacheKey = (String, String, Option<String>);

/// Least-recently-used map with a fixed number of keys.
#[derive(Debug)]
struct Lru {
    capacity: usize,
    tick: u64,
    entries: HashMap<CacheKey, (Arc<RenderableDescriptor>, u64)>,
}

impl Lru {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<Arc<RenderableDescriptor>> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|(value, used)| {
            *used = tick;
            value.clone()
        })
    }

    fn insert(&mut self, key: CacheKey, value: Arc<RenderableDescriptor>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.tick += 1;
        self.entries.insert(key, (value, self.tick));
    }
}

// --- Factory ---

/// Maps resource types to drawable classes. Never fails: the last step of
/// the chain is always [`BLANK_CLASS`].
#[derive(Debug)]
pub struct NodeFactory {
    cache: Mutex<Lru>,
}

impl Default for NodeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(Lru::new(capacity)),
        }
    }

    /// Group class for the module, else the type's concrete class, else the
    /// category class, else blank.
    pub fn resolve(
        &self,
        ctx: &ProviderContext,
        resource_type: &str,
        module: Option<&str>,
    ) -> Arc<RenderableDescriptor> {
        let key: CacheKey = (
            ctx.name().to_string(),
            resource_type.to_string(),
            module.map(str::to_string),
        );
        if let Some(hit) = self.lock().get(&key) {
            return hit;
        }
        let resolved = Arc::new(classify(ctx, resource_type, module));
        self.lock().insert(key, resolved.clone());
        resolved
    }

    /// Like [`resolve`](Self::resolve), preferring the node's display
    /// variant when the provider has a class for it.
    pub fn resolve_node(&self, ctx: &ProviderContext, node: &Node) -> Arc<RenderableDescriptor> {
        if let Some(variant) = ctx.variant_for(node) {
            if ctx.rules().classes.contains_key(variant) {
                return self.resolve(ctx, variant, node.module.as_deref());
            }
        }
        self.resolve(ctx, &node.resource_type, node.module.as_deref())
    }

    /// Descriptor for every visible node. Blank fallbacks are reported.
    pub fn resolve_graph(
        &self,
        graph: &ResourceGraph,
        registry: &ProviderRegistry,
        diagnostics: &mut Diagnostics,
    ) -> BTreeMap<String, Arc<RenderableDescriptor>> {
        let mut resolved = BTreeMap::new();
        for (id, node) in graph.nodes().filter(|(_, n)| !n.hidden) {
            let ctx = registry.context(registry.provider_for(node).unwrap_or("generic"));
            let descriptor = self.resolve_node(&ctx, node);
            if descriptor.kind == RenderableKind::Blank {
                diagnostics.warn(Some(id), "no renderable class; drawn as blank");
            }
            resolved.insert(id.to_string(), descriptor);
        }
        resolved
    }

    /// Number of memoised descriptors.
    pub fn cached(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lru> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn classify(ctx: &ProviderContext, resource_type: &str, module: Option<&str>) -> RenderableDescriptor {
    let rules = ctx.rules();
    let category = ctx.category(resource_type);
    let descriptor = |class: &str, kind| RenderableDescriptor {
        class: class.to_string(),
        kind,
        category,
        provider: ctx.name().to_string(),
    };

    if let Some(class) = module.and_then(|m| rules.group_classes.get(m)) {
        return descriptor(class, RenderableKind::Group);
    }
    if let Some(class) = rules.classes.get(resource_type) {
        return descriptor(class, RenderableKind::Concrete);
    }
    if let Some(class) = category.and_then(|c| rules.category_classes.get(&c)) {
        return descriptor(class, RenderableKind::Category);
    }
    tracing::debug!(provider = ctx.name(), resource_type, "no class; using blank");
    descriptor(BLANK_CLASS, RenderableKind::Blank)
}
