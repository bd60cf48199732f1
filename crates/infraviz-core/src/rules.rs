//! Provider rule bundles: the data a provider contributes to the pipeline.
//!
//! Bundles are camelCase JSON. Every pattern is parsed while the bundle is
//! deserialised, so a bundle that loads is a bundle that can run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::annotations::AnnotationDocument;
use crate::error::ConfigError;
use crate::pattern::ResourcePattern;
use crate::pipeline::handlers::HandlerStep;
use crate::service_mapping::ServiceCategory;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleBundle {
    /// Structural containers (VPCs, zones, subnets, ...).
    #[serde(default)]
    pub group_types: Vec<ResourcePattern>,
    #[serde(default)]
    pub handlers: Vec<HandlerRegistration>,
    #[serde(default)]
    pub links: Vec<LinkRule>,
    #[serde(default)]
    pub consolidate: Vec<ConsolidationRule>,
    #[serde(default)]
    pub expand: Vec<ExpansionRule>,
    #[serde(default)]
    pub forced_origin: Vec<ResourcePattern>,
    #[serde(default)]
    pub forced_destination: Vec<ResourcePattern>,
    #[serde(default)]
    pub forced_directions: Vec<ForcedDirection>,
    #[serde(default)]
    pub default_annotations: Vec<AutoAnnotation>,
    /// Type prefixes, background first.
    #[serde(default)]
    pub draw_order: Vec<String>,
    /// Legacy or alternate type → canonical type.
    #[serde(default)]
    pub type_aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub variants: BTreeMap<String, Vec<VariantRule>>,
    #[serde(default)]
    pub categories: BTreeMap<String, ServiceCategory>,
    #[serde(default)]
    pub classes: BTreeMap<String, String>,
    #[serde(default)]
    pub category_classes: BTreeMap<ServiceCategory, String>,
    #[serde(default)]
    pub group_classes: BTreeMap<String, String>,
}

impl RuleBundle {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Steps to run, in order, against every node matching `resource`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HandlerRegistration {
    pub resource: ResourcePattern,
    pub steps: Vec<HandlerStep>,
}

/// Bridge pattern `from ~ via ~ to`: a node matching `from` and a node
/// matching `to`, both adjacent to the same `via` node (in either raw
/// direction), get a direct `from -> to` edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinkRule {
    pub from: ResourcePattern,
    pub via: ResourcePattern,
    pub to: ResourcePattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsolidationMode {
    /// Merge the child into its parent and delete it.
    #[default]
    Fold,
    /// Keep the child, listed under its parent.
    Adopt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConsolidationRule {
    pub parent: ResourcePattern,
    pub children: Vec<ResourcePattern>,
    #[serde(default)]
    pub mode: ConsolidationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExpansionRule {
    pub resource: ResourcePattern,
    pub parent: ResourcePattern,
}

/// Between `from` and `to` only the `from -> to` direction survives a
/// two-node cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ForcedDirection {
    pub from: ResourcePattern,
    pub to: ResourcePattern,
}

/// Overlay applied when any node matches `when`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutoAnnotation {
    pub when: ResourcePattern,
    pub overlay: AnnotationDocument,
}

/// Display variant chosen when `attribute` contains `contains`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VariantRule {
    pub attribute: String,
    pub contains: String,
    pub variant: String,
}
