//! Template engine abstraction.
//!
//! An engine is a pluggable renderer for one template language, claiming a
//! set of file extensions. Engines are described by an [`EngineFactory`]
//! (cheap metadata, constructor) and instantiated lazily by the
//! [`EngineRegistry`] when the first template claiming one of their
//! extensions is loaded.
//!
//! # Module Structure
//!
//! - `registry` - engine set, lazy start, template dedup
//! - `template` - template identity (`namespace+name`) and directory
//! - `text` - builtin interpolation engine (`.html`/`.txt`)

pub mod registry;
pub mod template;
pub mod text;

pub use registry::{EngineRegistry, TemplateParams};
pub use template::{Template, TemplateDirectory, TemplateKey};

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;

/// Version of the engine contract this binary speaks.
///
/// Engines report their compiled-against version via `core_version()`;
/// a mismatch is a validation error.
pub const ENGINE_CORE_VERSION: &str = "1";

// ============================================================================
// Errors
// ============================================================================

/// Engine- and template-scoped errors.
///
/// `Validation` and `Config` exclude one engine from the registry; the
/// remaining variants are scoped to a single template file or render call.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Factory failed the capability check. All violations are collected
    /// and reported together.
    #[error("engine `{handle}` failed validation:\n{}", list(.violations))]
    Validation {
        handle: String,
        violations: Vec<String>,
    },

    /// Unknown keys in the engine's `[engines.<handle>]` config block.
    #[error("engine `{handle}` rejects unknown config keys: {}", .keys.join(", "))]
    Config { handle: String, keys: Vec<String> },

    /// No registered engine claims this file extension.
    #[error("no engine claims extension `{extension}` (template `{template}`)")]
    Resolution { template: String, extension: String },

    /// Engine construction or `initialise()` failed.
    #[error("engine `{handle}` failed to start: {message}")]
    Start { handle: String, message: String },

    /// Template source rejected by the engine at registration time.
    #[error("engine `{handle}` rejected template `{template}`: {message}")]
    Register {
        handle: String,
        template: String,
        message: String,
    },

    /// Render-time failure, including dangling template references.
    #[error("template `{0}` is not registered")]
    UnknownTemplate(String),

    /// Engine-reported render failure.
    #[error("render failed for `{template}`: {message}")]
    Render { template: String, message: String },
}

fn list(items: &[String]) -> String {
    items
        .iter()
        .map(|v| format!("- {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Engine contract
// ============================================================================

/// Engine self-description, surfaced in logs and `pagoda check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
}

/// Everything an engine receives when it is started.
pub struct EngineStartup {
    /// Template files across all namespaces the engine does not directly
    /// own, for cross-reference resolution.
    pub additional: Vec<PathBuf>,
    /// Merged `[engines.<handle>]` configuration block.
    pub config: serde_json::Value,
    /// Shared directory of registered template names.
    pub directory: Arc<TemplateDirectory>,
}

/// Constructor and metadata for one engine.
///
/// Factories are cheap; the engine instance itself is only constructed when
/// the first template claiming one of its extensions is loaded.
pub trait EngineFactory: Send + Sync {
    /// Unique short identifier (e.g. `"text"`).
    fn handle(&self) -> &'static str;

    /// File extensions this engine claims, in declaration order,
    /// including the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Keys the engine accepts in its `[engines.<handle>]` config block.
    /// Unknown keys in the block are rejected at registration.
    fn config_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Construct the engine instance. `initialise()` is invoked on the
    /// result before any template registration proceeds.
    fn create(&self, startup: EngineStartup) -> Result<Box<dyn TemplateEngine>, EngineError>;
}

/// A live rendering engine.
///
/// The five required capabilities of the engine contract; `finish_loading`
/// is an optional post-load hook with a no-op default.
#[async_trait]
pub trait TemplateEngine: Send + Sync {
    /// Engine contract version this engine was built against.
    fn core_version(&self) -> &'static str;

    /// Engine self-description.
    fn info(&self) -> EngineInfo;

    /// One-time startup. Completes before any `register` call.
    async fn initialise(&mut self) -> Result<(), EngineError>;

    /// Compile/validate one template source under its key.
    async fn register(&self, key: &TemplateKey, source: &str) -> Result<(), EngineError>;

    /// Produce output for a registered template given a data context.
    async fn render(
        &self,
        key: &TemplateKey,
        context: &serde_json::Value,
    ) -> Result<String, EngineError>;

    /// Optional hook invoked after each load pass completes.
    async fn finish_loading(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

// ============================================================================
// Capability check
// ============================================================================

/// Structural validation of an engine factory's declared metadata.
///
/// Every violated requirement is collected and reported in a single
/// [`EngineError::Validation`], not one at a time.
pub fn validate_factory(factory: &dyn EngineFactory) -> Result<(), EngineError> {
    let mut violations = Vec::new();

    let handle = factory.handle();
    if handle.trim().is_empty() {
        violations.push("handle must be a non-empty string".to_string());
    }
    if handle.chars().any(char::is_whitespace) {
        violations.push(format!("handle `{handle}` must not contain whitespace"));
    }

    let extensions = factory.extensions();
    if extensions.is_empty() {
        violations.push("extensions must be a non-empty set".to_string());
    }
    for ext in extensions {
        if !ext.starts_with('.') || ext.len() < 2 {
            violations.push(format!("extension `{ext}` must start with a dot"));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation {
            handle: handle.to_string(),
            violations,
        })
    }
}

/// The builtin engine set.
pub fn builtin_factories(_config: &AppConfig) -> Vec<Box<dyn EngineFactory>> {
    vec![Box::new(text::TextEngineFactory)]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct BadFactory;

    impl EngineFactory for BadFactory {
        fn handle(&self) -> &'static str {
            ""
        }
        fn extensions(&self) -> &'static [&'static str] {
            &[]
        }
        fn create(&self, _: EngineStartup) -> Result<Box<dyn TemplateEngine>, EngineError> {
            unreachable!("never constructed in tests")
        }
    }

    struct BadExtFactory;

    impl EngineFactory for BadExtFactory {
        fn handle(&self) -> &'static str {
            "bad ext"
        }
        fn extensions(&self) -> &'static [&'static str] {
            &["dust", "."]
        }
        fn create(&self, _: EngineStartup) -> Result<Box<dyn TemplateEngine>, EngineError> {
            unreachable!("never constructed in tests")
        }
    }

    #[test]
    fn test_validation_enumerates_all_violations() {
        let err = validate_factory(&BadFactory).unwrap_err();
        let EngineError::Validation { violations, .. } = &err else {
            panic!("expected validation error");
        };
        // Empty handle + empty extension set reported together
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn test_validation_checks_extension_shape() {
        let err = validate_factory(&BadExtFactory).unwrap_err();
        let EngineError::Validation { violations, .. } = &err else {
            panic!("expected validation error");
        };
        // Whitespace in handle + two malformed extensions
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().any(|v| v.contains("`dust`")));
    }

    #[test]
    fn test_builtin_factory_is_valid() {
        let config = AppConfig::default();
        for factory in builtin_factories(&config) {
            validate_factory(&*factory).unwrap();
        }
    }
}
