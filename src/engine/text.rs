//! Builtin interpolation engine.
//!
//! Renders `.html`/`.txt` templates by substituting `{{ key.path }}`
//! placeholders with values from the JSON render context, and expanding
//! `{{> name }}` includes from the `partials` namespace. It is the in-tree
//! reference implementation of the engine contract; richer languages plug
//! in through their own [`EngineFactory`].

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::{Captures, Regex};
use rustc_hash::FxHashMap;

use super::{
    ENGINE_CORE_VERSION, EngineError, EngineFactory, EngineInfo, EngineStartup, TemplateDirectory,
    TemplateEngine, TemplateKey,
};

/// `{{ key.path }}` placeholder
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.-]*)\s*\}\}").unwrap());

/// `{{> name }}` partial include
static INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{>\s*([A-Za-z0-9_][A-Za-z0-9_.-]*)\s*\}\}").unwrap());

/// Include nesting limit; deeper chains indicate a cycle.
const MAX_INCLUDE_DEPTH: usize = 8;

/// Factory for the builtin text engine.
pub struct TextEngineFactory;

impl EngineFactory for TextEngineFactory {
    fn handle(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".html", ".txt"]
    }

    fn config_keys(&self) -> &'static [&'static str] {
        &["strict"]
    }

    fn create(&self, startup: EngineStartup) -> Result<Box<dyn TemplateEngine>, EngineError> {
        let strict = startup
            .config
            .get("strict")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        Ok(Box::new(TextEngine {
            strict,
            sources: RwLock::new(FxHashMap::default()),
            directory: startup.directory,
        }))
    }
}

/// The builtin text engine instance.
pub struct TextEngine {
    /// Error on unresolvable placeholders instead of substituting "".
    strict: bool,
    /// Registered template sources.
    sources: RwLock<FxHashMap<TemplateKey, String>>,
    /// Shared template-name directory (include resolution hints).
    directory: Arc<TemplateDirectory>,
}

#[async_trait]
impl TemplateEngine for TextEngine {
    fn core_version(&self) -> &'static str {
        ENGINE_CORE_VERSION
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            name: "text interpolation".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn initialise(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn register(&self, key: &TemplateKey, source: &str) -> Result<(), EngineError> {
        self.sources.write().insert(key.clone(), source.to_string());
        Ok(())
    }

    async fn render(
        &self,
        key: &TemplateKey,
        context: &serde_json::Value,
    ) -> Result<String, EngineError> {
        let source = self
            .sources
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTemplate(key.to_string()))?;

        let expanded = self.expand_includes(key, &source)?;
        self.interpolate(key, &expanded, context)
    }
}

impl TextEngine {
    /// Expand `{{> name }}` includes, preferring the `partials` namespace
    /// and falling back to the template's own namespace.
    fn expand_includes(&self, key: &TemplateKey, source: &str) -> Result<String, EngineError> {
        let mut current = source.to_string();

        for _ in 0..MAX_INCLUDE_DEPTH {
            if !INCLUDE.is_match(&current) {
                return Ok(current);
            }

            let mut missing = None;
            let sources = self.sources.read();
            current = INCLUDE
                .replace_all(&current, |caps: &Captures<'_>| {
                    let name = &caps[1];
                    let partial_key = TemplateKey::new("partials", name);
                    let local_key = TemplateKey::new(key.namespace.clone(), name);
                    match sources.get(&partial_key).or_else(|| sources.get(&local_key)) {
                        Some(body) => body.clone(),
                        None => {
                            missing.get_or_insert_with(|| name.to_string());
                            String::new()
                        }
                    }
                })
                .into_owned();
            drop(sources);

            if let Some(name) = missing {
                // A dangling include is visible in the directory check too
                let known = self.directory.contains(&TemplateKey::new("partials", name.clone()));
                return Err(EngineError::Render {
                    template: key.to_string(),
                    message: if known {
                        format!("partial `{name}` is known but not registered with this engine")
                    } else {
                        format!("unknown partial `{name}`")
                    },
                });
            }
        }

        Err(EngineError::Render {
            template: key.to_string(),
            message: format!("include depth exceeds {MAX_INCLUDE_DEPTH} (cycle?)"),
        })
    }

    /// Substitute `{{ key.path }}` placeholders from the context.
    fn interpolate(
        &self,
        key: &TemplateKey,
        source: &str,
        context: &serde_json::Value,
    ) -> Result<String, EngineError> {
        let mut missing = None;
        let output = PLACEHOLDER
            .replace_all(source, |caps: &Captures<'_>| {
                let path = &caps[1];
                match lookup(context, path) {
                    Some(value) => value_to_string(value),
                    None => {
                        if self.strict {
                            missing.get_or_insert_with(|| path.to_string());
                        }
                        String::new()
                    }
                }
            })
            .into_owned();

        match missing {
            Some(path) => Err(EngineError::Render {
                template: key.to_string(),
                message: format!("unresolved placeholder `{path}`"),
            }),
            None => Ok(output),
        }
    }
}

/// Dotted-path lookup into a JSON value.
fn lookup<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a JSON leaf as display text.
fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
