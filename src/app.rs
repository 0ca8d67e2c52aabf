//! Application context: the owned aggregate of routing table, engine
//! registry, and rewrite set.
//!
//! One `App` is built per process and shared behind an `Arc`. All load and
//! reload passes run here; the serve layer only reads. Passes are full
//! re-derivations from the workspace directories, never incremental diffs,
//! so a pass after any sequence of file events converges to the same state
//! as a cold start.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use rustc_hash::FxHashSet;

use crate::config::AppConfig;
use crate::engine::registry::{EngineRegistry, TemplateParams};
use crate::engine::builtin_factories;
use crate::log;
use crate::page::loader;
use crate::route::{Component, RewriteSet, RouteTable};

/// Namespace for shared partial templates.
pub const PARTIALS_NAMESPACE: &str = "partials";

pub struct App {
    pub config: Arc<AppConfig>,
    pub routes: RouteTable,
    pub engines: EngineRegistry,
    pub rewrites: ArcSwap<RewriteSet>,
}

impl App {
    /// Build the context and integrate the engine factories.
    ///
    /// Engine registration happens before the context is shared; engines
    /// themselves start lazily on first template load.
    pub fn new(config: Arc<AppConfig>) -> Self {
        let mut engines = EngineRegistry::new();
        engines.load_engines(builtin_factories(&config), &config);

        Self {
            config,
            routes: RouteTable::new(),
            engines,
            rewrites: ArcSwap::from_pointee(RewriteSet::default()),
        }
    }

    /// Cold-start pass: workspace directories, templates, pages, rewrites.
    pub async fn bootstrap(&self) -> Result<()> {
        self.config.ensure_workspace()?;
        self.load_templates(false).await;
        self.load_pages(false);
        self.load_rewrites();
        Ok(())
    }

    /// Derive routes from the pages directory and install them.
    ///
    /// On a reload pass, bindings are replaced in place and bindings whose
    /// schema files disappeared are swept afterwards. A pass that hits
    /// per-file errors keeps the previous bindings for those files' paths:
    /// errors never empty the table.
    pub fn load_pages(&self, reload: bool) -> usize {
        let outcome = loader::load_directory(&self.config.pages_dir());
        for err in &outcome.errors {
            log!("pages"; "{err}");
        }

        let mut live: FxHashSet<String> = FxHashSet::default();
        for descriptor in &outcome.descriptors {
            live.extend(descriptor.paths.iter().cloned());
            let component = Arc::new(Component::new(descriptor.clone()));
            self.routes.add_component(descriptor, component, reload);
        }

        if reload && outcome.errors.is_empty() {
            self.routes.retain_paths(&live);
        }

        outcome.descriptors.len()
    }

    /// Load every template the registered engines claim.
    ///
    /// Page templates go in the root namespace, partials under
    /// `partials:`. Recompile passes rebuild the template set wholesale.
    /// A template that fails to load is logged and skipped; the pass
    /// continues with the rest.
    pub async fn load_templates(&self, reload: bool) -> usize {
        if reload {
            self.engines.clear_templates();
        }

        let page_files = self.template_files(&self.config.pages_dir());
        let partial_files = self.template_files(&self.config.partials_dir());

        let additional: Vec<PathBuf> = page_files
            .iter()
            .chain(partial_files.iter())
            .cloned()
            .collect();

        let mut loaded = 0;
        for (namespace, files) in [("", &page_files), (PARTIALS_NAMESPACE, &partial_files)] {
            for path in files {
                let source = match std::fs::read_to_string(path) {
                    Ok(source) => source,
                    Err(e) => {
                        log!("engine"; "failed to read {}: {e}", path.display());
                        continue;
                    }
                };
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let extension = path
                    .extension()
                    .and_then(|s| s.to_str())
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default();

                let params = TemplateParams {
                    name,
                    namespace: namespace.to_string(),
                    extension,
                    source,
                    path: path.clone(),
                    additional: additional.clone(),
                };
                match self.engines.load_template(params).await {
                    Ok(_) => loaded += 1,
                    Err(e) => log!("engine"; "{e}"),
                }
            }
        }

        self.engines.finish_loading().await;
        loaded
    }

    /// Files in `dir` whose extension some registered engine claims.
    fn template_files(&self, dir: &std::path::Path) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut files: Vec<_> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| self.engines.claims_extension(&format!(".{e}")))
            })
            .collect();
        files.sort();
        files
    }

    /// Rebuild the rewrite set from the routes directory and swap it in.
    pub fn load_rewrites(&self) -> usize {
        let set = RewriteSet::load(&self.config.routes_dir());
        let count = set.len();
        self.rewrites.store(Arc::new(set));
        count
    }
}

// ============================================================================
// Tests
// ============================================================================
