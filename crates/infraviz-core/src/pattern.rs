use std::fmt;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::PatternError;
use crate::graph::base_id;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A reference to one or more resources, e.g. `aws_instance.web`,
/// `aws_iam*` or `aws_lb`.
///
/// A pattern containing a dot is matched against the full node id; a
/// dot-less pattern is matched against the resource type only. `*` matches
/// zero or more characters, every other character is literal. An exact id
/// also matches the numbered instances (`~k`) of that resource.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePattern {
    raw: String,
    scope: Scope,
    glob: Option<Pattern>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Id,
    Type,
}

impl ResourcePattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        let scope = if raw.contains('.') { Scope::Id } else { Scope::Type };
        let glob = if raw.contains('*') {
            let escaped = raw
                .split('*')
                .map(Pattern::escape)
                .collect::<Vec<_>>()
                .join("*");
            let compiled = Pattern::new(&escaped).map_err(|source| PatternError::Invalid {
                pattern: raw.to_string(),
                source,
            })?;
            Some(compiled)
        } else {
            None
        };
        Ok(Self {
            raw: raw.to_string(),
            scope,
            glob,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True for a wildcard-free `type.name` reference.
    pub fn is_exact_id(&self) -> bool {
        self.scope == Scope::Id && self.glob.is_none()
    }

    pub fn is_type_only(&self) -> bool {
        self.scope == Scope::Type
    }

    pub fn matches(&self, id: &str, resource_type: &str) -> bool {
        match (self.scope, &self.glob) {
            (Scope::Type, None) => resource_type == self.raw,
            (Scope::Type, Some(glob)) => glob.matches_with(resource_type, MATCH_OPTIONS),
            (Scope::Id, None) => id == self.raw || base_id(id) == self.raw,
            (Scope::Id, Some(glob)) => glob.matches_with(id, MATCH_OPTIONS),
        }
    }

    /// Match against a bare resource type, as rule tables do.
    pub fn matches_type(&self, resource_type: &str) -> bool {
        match self.scope {
            Scope::Type => self.matches(resource_type, resource_type),
            Scope::Id => false,
        }
    }
}

impl TryFrom<String> for ResourcePattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResourcePattern::parse(&value)
    }
}

impl From<ResourcePattern> for String {
    fn from(value: ResourcePattern) -> Self {
        value.raw
    }
}

impl PartialEq for ResourcePattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ResourcePattern {}

impl fmt::Debug for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourcePattern").field(&self.raw).finish()
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
