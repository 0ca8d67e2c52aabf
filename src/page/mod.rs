//! Page schemas and descriptors.
//!
//! A page-schema file is a JSON document in the pages directory:
//!
//! ```json
//! {
//!   "route": { "paths": ["/index"], "constraint": "param:preview" },
//!   "page": { "template": "home.html", "methods": ["get", "post"] },
//!   "title": "Home"
//! }
//! ```
//!
//! Unrecognized top-level fields are passed through to the render context
//! untouched; only `route` and `page` carry routing meaning.

pub mod loader;

pub use loader::{ScanOutcome, load_directory};

use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Schema file extension the loader recognizes.
pub const SCHEMA_EXTENSION: &str = "json";

// ============================================================================
// Errors
// ============================================================================

/// File-scoped load failure. Aborts only the offending file, never the batch.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed page schema `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid constraint `{value}` in `{path}`: expected `param:<key>` or `header:<name>`")]
    Constraint { path: PathBuf, value: String },
}

impl LoadError {
    /// Path of the offending file.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } | Self::Constraint { path, .. } => {
                path
            }
        }
    }
}

// ============================================================================
// Schema (wire format)
// ============================================================================

/// Raw page-schema file contents.
#[derive(Debug, Deserialize)]
pub struct PageSchema {
    #[serde(default)]
    pub route: RouteSchema,
    pub page: PageSection,
    /// Engine- and page-specific fields, fed to the render context.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `route` block: path aliases and an optional runtime constraint.
#[derive(Debug, Default, Deserialize)]
pub struct RouteSchema {
    /// Path patterns; defaults to `/<name>` when empty.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Runtime predicate a request must satisfy for the binding to apply.
    #[serde(default)]
    pub constraint: Option<String>,
}

/// `page` block: template reference and handled verbs.
#[derive(Debug, Deserialize)]
pub struct PageSection {
    /// Template reference, resolved at render time.
    pub template: String,
    /// HTTP verbs the component handles (case-insensitive, default `get`).
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
}

fn default_methods() -> Vec<String> {
    vec!["get".to_string()]
}

// ============================================================================
// Constraint
// ============================================================================

/// Runtime predicate a request must satisfy for a path binding to apply.
///
/// Declared in the schema as a string: `param:<key>` requires the query
/// parameter, `header:<name>` requires the header. Unknown forms fail
/// closed at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Request must carry this query parameter.
    QueryParam(String),
    /// Request must carry this header.
    Header(String),
}

impl FromStr for Constraint {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("param", key)) if !key.is_empty() => Ok(Self::QueryParam(key.to_string())),
            Some(("header", name)) if !name.is_empty() => {
                Ok(Self::Header(name.to_ascii_lowercase()))
            }
            _ => Err(()),
        }
    }
}

// ============================================================================
// PageDescriptor
// ============================================================================

/// Routing identity derived from one parsed schema file.
///
/// Replaced wholesale (never mutated in place) when the backing file
/// changes; removed when the file is deleted.
#[derive(Debug, Clone)]
pub struct PageDescriptor {
    /// Derived from the schema filename; unique within its directory.
    pub name: String,
    /// Backing schema file.
    pub source: PathBuf,
    /// Normalized path patterns this page binds.
    pub paths: Vec<String>,
    /// Optional runtime constraint shared by all paths.
    pub constraint: Option<Constraint>,
    /// Template reference, resolved at render time.
    pub template: String,
    /// Lower-cased verbs the component handles.
    pub methods: Vec<String>,
    /// Pass-through schema fields for the render context.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PageDescriptor {
    /// Build a descriptor from a parsed schema.
    pub fn from_schema(name: &str, source: PathBuf, schema: PageSchema) -> Result<Self, LoadError> {
        let constraint = match &schema.route.constraint {
            Some(value) => Some(value.parse().map_err(|()| LoadError::Constraint {
                path: source.clone(),
                value: value.clone(),
            })?),
            None => None,
        };

        let mut paths: Vec<String> = schema
            .route
            .paths
            .iter()
            .map(|p| normalize_route_path(p))
            .collect();
        if paths.is_empty() {
            paths.push(format!("/{name}"));
        }
        paths.dedup();

        Ok(Self {
            name: name.to_string(),
            source,
            paths,
            constraint,
            template: schema.page.template,
            methods: schema
                .page
                .methods
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect(),
            extra: schema.extra,
        })
    }

    /// Whether this page binds the catch-all `/index` path.
    pub fn is_index(&self) -> bool {
        self.paths.iter().any(|p| p == "/index")
    }
}

/// Normalize a declared route path: leading slash, no trailing slash
/// (except the root itself).
fn normalize_route_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

// ============================================================================
// Tests
// ============================================================================
