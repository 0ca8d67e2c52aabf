//! Template identity and shared name directory.

use std::fmt;
use std::path::PathBuf;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

/// Identity of one loaded template: `namespace + name`.
///
/// The namespace distinguishes templates with identical base names loaded
/// from different sources (e.g. page templates vs partials) and defaults to
/// the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateKey {
    pub namespace: String,
    pub name: String,
}

impl TemplateKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key in the default (empty) namespace.
    pub fn unnamespaced(name: impl Into<String>) -> Self {
        Self::new("", name)
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.namespace, self.name)
        }
    }
}

/// One loaded template bound to its owning engine.
///
/// The engine binding is resolved once, at load time; the engine's lifecycle
/// is owned by the registry, not the template.
#[derive(Debug, Clone)]
pub struct Template {
    /// Identity key.
    pub key: TemplateKey,
    /// Handle of the engine that claimed this template's extension.
    pub engine: String,
    /// Backing source file.
    pub source_path: PathBuf,
}

impl Template {
    pub fn new(key: TemplateKey, engine: impl Into<String>, source_path: PathBuf) -> Self {
        Self {
            key,
            engine: engine.into(),
            source_path,
        }
    }
}

/// Shared directory of registered template names.
///
/// Handed to every engine at start so cross-references can be resolved
/// without reaching back into the registry. Rebuilt wholesale on each
/// recompile pass.
#[derive(Debug, Default)]
pub struct TemplateDirectory {
    names: RwLock<FxHashSet<TemplateKey>>,
}

impl TemplateDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: TemplateKey) {
        self.names.write().insert(key);
    }

    pub fn contains(&self, key: &TemplateKey) -> bool {
        self.names.read().contains(key)
    }

    pub fn clear(&self) {
        self.names.write().clear();
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }

    /// Snapshot of all registered keys, sorted for stable output.
    pub fn names(&self) -> Vec<TemplateKey> {
        let mut keys: Vec<_> = self.names.read().iter().cloned().collect();
        keys.sort();
        keys
    }
}
