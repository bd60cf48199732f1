pub mod annotations;
pub mod diagnostics;
pub mod error;
pub mod factory;
pub mod graph;
pub mod pattern;
pub mod pipeline;
pub mod provider;
pub mod rules;
pub mod service_mapping;

use std::fs;
use std::path::{Path, PathBuf};

pub use annotations::{AnnotationDocument, Overlay, PinnedEdges};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{AnnotationError, ConfigError, PatternError, PipelineError};
pub use factory::{NodeFactory, RenderableDescriptor, RenderableKind};
pub use graph::{Attributes, Node, NodeRef, RawResource, ResourceGraph};
pub use pattern::ResourcePattern;
pub use pipeline::{PassKind, Pipeline, PipelineOutput};
pub use provider::{Detection, ProviderContext, ProviderDescriptor, ProviderRegistry};
pub use service_mapping::{ServiceCategory, ServiceMapping};

// --- Storage ---

/// Per-user configuration root.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".infraviz")
}

/// Provider names with an override bundle in `dir`, sorted.
pub fn list_provider_overrides(dir: &Path) -> Result<Vec<String>, ConfigError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let entries = fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_suffix(".json").map(|n| n.to_string())
        })
        .collect();
    names.sort();
    Ok(names)
}

/// Planner output as a JSON array of resources.
pub fn read_resources(path: &Path) -> Result<Vec<RawResource>, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn read_annotations(path: &Path) -> Result<AnnotationDocument, AnnotationError> {
    let raw = fs::read_to_string(path).map_err(|source| AnnotationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    AnnotationDocument::from_yaml(&raw)
}

/// Build the graph from planner output and run the whole pipeline.
pub fn transform(
    resources: Vec<RawResource>,
    registry: &ProviderRegistry,
    annotations: Option<AnnotationDocument>,
) -> Result<PipelineOutput, PipelineError> {
    let mut diagnostics = Diagnostics::new();
    let graph = ResourceGraph::from_resources(resources, &mut diagnostics);
    let mut pipeline = Pipeline::new(registry);
    if let Some(document) = annotations {
        pipeline = pipeline.with_annotations(document);
    }
    let mut output = pipeline.run(graph)?;
    diagnostics.extend(output.diagnostics);
    output.diagnostics = diagnostics;
    Ok(output)
}
