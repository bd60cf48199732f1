use std::path::PathBuf;

use thiserror::Error;

/// Conditions that stop a run before any output is produced.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "no recognizable provider resources: none of the {node_count} resources match a \
         registered provider (known prefixes: {known_prefixes})"
    )]
    NoProviderDetected {
        node_count: usize,
        known_prefixes: String,
    },

    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

/// A malformed annotation document.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("annotation document could not be parsed: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("annotation section `{section}` is malformed: {reason}")]
    Malformed { section: String, reason: String },

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("failed to read annotation file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AnnotationError {
    pub(crate) fn malformed(section: &str, reason: impl Into<String>) -> Self {
        AnnotationError::Malformed {
            section: section.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("resource pattern must not be empty")]
    Empty,

    #[error("invalid resource pattern `{pattern}`: {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Failure to load a provider rule bundle. Never escapes the registry: a
/// broken bundle degrades to the default rules.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("provider bundle is not valid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read provider bundle {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
