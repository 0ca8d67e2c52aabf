//! Engine registry - owns the engine set and the loaded template table.
//!
//! Engines move through a two-state lifecycle:
//!
//! ```text
//! Registered (factory known) --first claiming template--> Started (initialised)
//! ```
//!
//! The lazy transition is load-bearing: engines with expensive startup never
//! pay that cost unless a template actually needs them. Concurrent template
//! loads racing to start the same engine start it exactly once; later
//! requesters await the in-flight start.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::OnceCell;

use super::{
    EngineError, EngineFactory, EngineStartup, Template, TemplateDirectory, TemplateEngine,
    TemplateKey, validate_factory,
};
use crate::config::AppConfig;
use crate::{debug, log};

/// One engine slot: factory plus the lazily-started instance.
pub struct EngineRegistration {
    /// Unique short identifier.
    pub handle: String,
    /// Claimed file extensions, in declaration order.
    pub extensions: Vec<String>,
    /// Constructor, consulted once on first use.
    factory: Box<dyn EngineFactory>,
    /// Merged `[engines.<handle>]` config block.
    config: serde_json::Value,
    /// Live instance, present only once started.
    engine: OnceCell<Arc<dyn TemplateEngine>>,
}

impl EngineRegistration {
    /// Whether the engine instance has been constructed and initialised.
    pub fn started(&self) -> bool {
        self.engine.initialized()
    }
}

/// Parameters for loading one template source file.
#[derive(Debug, Clone)]
pub struct TemplateParams {
    /// Logical template name (file stem).
    pub name: String,
    /// Namespace, empty for page templates.
    pub namespace: String,
    /// File extension including the leading dot.
    pub extension: String,
    /// Raw template source.
    pub source: String,
    /// Backing file path (for error reporting).
    pub path: PathBuf,
    /// All template files of the current pass the owning engine has no
    /// direct ownership of; handed to the engine if this load starts it.
    pub additional: Vec<PathBuf>,
}

/// Owns the set of available rendering engines and the loaded templates.
///
/// Mutated only from the single reload/bootstrap context; request dispatch
/// only reads. `load_engines` runs before the registry is shared.
pub struct EngineRegistry {
    /// Registration order is the extension tie-break order.
    registrations: Vec<EngineRegistration>,
    templates: RwLock<FxHashMap<TemplateKey, Template>>,
    directory: Arc<TemplateDirectory>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            templates: RwLock::new(FxHashMap::default()),
            directory: Arc::new(TemplateDirectory::new()),
        }
    }

    /// Integrate a batch of engine factories.
    ///
    /// Per factory: metadata validation (all violations enumerated in one
    /// error), duplicate-handle detection (warn + skip, tolerating redundant
    /// registration passes), and config-block validation against the
    /// factory's declared key set with unknown keys rejected. A failing
    /// engine is excluded; the rest of the batch is unaffected.
    pub fn load_engines(&mut self, factories: Vec<Box<dyn EngineFactory>>, config: &AppConfig) {
        for factory in factories {
            if let Err(e) = validate_factory(&*factory) {
                log!("engine"; "{e}");
                continue;
            }

            let handle = factory.handle().to_string();
            if self.registrations.iter().any(|r| r.handle == handle) {
                log!("engine"; "duplicate handle `{handle}`, ignoring");
                continue;
            }

            let engine_config = config.engine_config(&handle);
            if let Err(e) = check_config_keys(&*factory, &engine_config) {
                log!("engine"; "{e}");
                continue;
            }

            debug!("engine"; "registered `{}` for {}", handle, factory.extensions().join(" "));
            self.registrations.push(EngineRegistration {
                handle,
                extensions: factory
                    .extensions()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                factory,
                config: engine_config,
                engine: OnceCell::new(),
            });
        }
    }

    /// First registered engine claiming `ext`, in registration order.
    ///
    /// Overlapping extension claims are legal; the first registrant wins
    /// deterministically.
    pub fn find_engine_for_extension(&self, ext: &str) -> Option<&EngineRegistration> {
        self.registrations
            .iter()
            .find(|r| r.extensions.iter().any(|e| e == ext))
    }

    /// Registration by handle.
    pub fn registration(&self, handle: &str) -> Option<&EngineRegistration> {
        self.registrations.iter().find(|r| r.handle == handle)
    }

    /// Registered handles, in registration order.
    pub fn handles(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.handle.as_str()).collect()
    }

    /// Whether any registered engine claims `ext`.
    pub fn claims_extension(&self, ext: &str) -> bool {
        self.find_engine_for_extension(ext).is_some()
    }

    /// Load one template source file.
    ///
    /// Resolves the engine by extension, lazily starting it on first use
    /// (construction + `initialise()` complete before registration
    /// proceeds). Loading a template whose `namespace+name` key already
    /// exists is a success no-op, tolerating repeated reload triggers.
    /// Returns the logical template name.
    pub async fn load_template(&self, params: TemplateParams) -> Result<String, EngineError> {
        let key = TemplateKey::new(params.namespace.clone(), params.name.clone());

        if self.templates.read().contains_key(&key) {
            debug!("engine"; "template `{key}` already present, skipping");
            return Ok(params.name);
        }

        let registration = self
            .find_engine_for_extension(&params.extension)
            .ok_or_else(|| EngineError::Resolution {
                template: params.name.clone(),
                extension: params.extension.clone(),
            })?;

        let engine = self.start_engine(registration, &params.additional).await?;
        engine.register(&key, &params.source).await?;

        self.templates.write().insert(
            key.clone(),
            Template::new(key.clone(), registration.handle.clone(), params.path),
        );
        self.directory.insert(key.clone());

        debug!("engine"; "loaded template `{key}` via `{}`", registration.handle);
        Ok(params.name)
    }

    /// Start an engine if it has not started yet.
    ///
    /// First requester constructs and initialises; concurrent requesters
    /// await the same in-flight start rather than double-initialising.
    async fn start_engine(
        &self,
        registration: &EngineRegistration,
        additional: &[PathBuf],
    ) -> Result<Arc<dyn TemplateEngine>, EngineError> {
        registration
            .engine
            .get_or_try_init(|| async {
                debug!("engine"; "starting `{}`", registration.handle);
                // The engine's own template files arrive through register();
                // the startup list carries only files it has no ownership of
                let additional: Vec<PathBuf> = additional
                    .iter()
                    .filter(|p| {
                        p.extension()
                            .and_then(|e| e.to_str())
                            .map(|e| format!(".{e}"))
                            .is_none_or(|ext| !registration.extensions.contains(&ext))
                    })
                    .cloned()
                    .collect();
                let startup = EngineStartup {
                    additional,
                    config: registration.config.clone(),
                    directory: Arc::clone(&self.directory),
                };
                let mut engine = registration.factory.create(startup)?;
                engine.initialise().await?;

                if engine.core_version() != super::ENGINE_CORE_VERSION {
                    return Err(EngineError::Start {
                        handle: registration.handle.clone(),
                        message: format!(
                            "engine core version `{}` does not match `{}`",
                            engine.core_version(),
                            super::ENGINE_CORE_VERSION
                        ),
                    });
                }

                let engine: Arc<dyn TemplateEngine> = Arc::from(engine);
                log!("engine"; "started `{}` ({})", registration.handle, engine.info().name);
                Ok(engine)
            })
            .await
            .cloned()
    }

    /// Render a registered template by reference.
    ///
    /// The reference may carry a claimed extension (`home.html`); it is
    /// stripped to the logical name. A dangling reference surfaces here,
    /// at render time, not at page-load time.
    pub async fn render(
        &self,
        template_ref: &str,
        namespace: &str,
        context: &serde_json::Value,
    ) -> Result<String, EngineError> {
        let key = self
            .resolve_key(template_ref, namespace)
            .ok_or_else(|| EngineError::UnknownTemplate(template_ref.to_string()))?;

        let handle = {
            let templates = self.templates.read();
            match templates.get(&key) {
                Some(template) => template.engine.clone(),
                None => return Err(EngineError::UnknownTemplate(key.to_string())),
            }
        };

        // Registered templates always have a started engine: registration
        // only proceeds after the start completes.
        let engine = self
            .registration(&handle)
            .and_then(|r| r.engine.get())
            .cloned()
            .ok_or_else(|| EngineError::UnknownTemplate(key.to_string()))?;

        engine.render(&key, context).await
    }

    /// Resolve a template reference to a registered key.
    fn resolve_key(&self, template_ref: &str, namespace: &str) -> Option<TemplateKey> {
        let exact = TemplateKey::new(namespace, template_ref);
        if self.templates.read().contains_key(&exact) {
            return Some(exact);
        }

        // `home.html` style references: strip the extension when an engine
        // claims it and retry with the stem.
        let (stem, ext) = template_ref.rsplit_once('.')?;
        if !self.claims_extension(&format!(".{ext}")) {
            return None;
        }
        let stem_key = TemplateKey::new(namespace, stem);
        self.templates
            .read()
            .contains_key(&stem_key)
            .then_some(stem_key)
    }

    /// Invoke each started engine's post-load hook.
    ///
    /// Engines without a hook fall through the default no-op. Hook failures
    /// are engine-scoped: logged, pass continues.
    pub async fn finish_loading(&self) {
        for registration in &self.registrations {
            let Some(engine) = registration.engine.get() else {
                continue;
            };
            if let Err(e) = engine.finish_loading().await {
                log!("engine"; "post-load hook failed for `{}`: {e}", registration.handle);
            }
        }
    }

    /// Drop all loaded templates. Recompile passes rebuild the template set
    /// wholesale rather than diffing incrementally.
    pub fn clear_templates(&self) {
        self.templates.write().clear();
        self.directory.clear();
    }

    /// Number of loaded templates.
    pub fn template_count(&self) -> usize {
        self.templates.read().len()
    }

    /// Whether a template reference resolves to a loaded template.
    pub fn has_template(&self, template_ref: &str, namespace: &str) -> bool {
        self.resolve_key(template_ref, namespace).is_some()
    }
}

/// Reject unknown keys in an engine's config block.
fn check_config_keys(
    factory: &dyn EngineFactory,
    config: &serde_json::Value,
) -> Result<(), EngineError> {
    let Some(object) = config.as_object() else {
        return Ok(());
    };
    let known = factory.config_keys();
    let unknown: Vec<String> = object
        .keys()
        .filter(|k| !known.contains(&k.as_str()))
        .cloned()
        .collect();

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Config {
            handle: factory.handle().to_string(),
            keys: unknown,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock engine that counts how often it was constructed/initialised
    /// and how often its post-load hook ran.
    struct MockEngine {
        handle: &'static str,
        initialised: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
        start_delay: Duration,
    }

    #[async_trait]
    impl TemplateEngine for MockEngine {
        fn core_version(&self) -> &'static str {
            crate::engine::ENGINE_CORE_VERSION
        }

        fn info(&self) -> EngineInfo {
            EngineInfo {
                name: self.handle.to_string(),
                version: "0.0.0".to_string(),
            }
        }

        async fn initialise(&mut self) -> Result<(), EngineError> {
            // Yield so racing loads genuinely overlap the start window
            tokio::time::sleep(self.start_delay).await;
            self.initialised.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn register(&self, _: &TemplateKey, _: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn render(
            &self,
            key: &TemplateKey,
            _: &serde_json::Value,
        ) -> Result<String, EngineError> {
            Ok(format!("{}:{}", self.handle, key))
        }

        async fn finish_loading(&self) -> Result<(), EngineError> {
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockFactory {
        handle: &'static str,
        extensions: &'static [&'static str],
        initialised: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
        start_delay: Duration,
    }

    impl MockFactory {
        fn new(handle: &'static str, extensions: &'static [&'static str]) -> (Self, Arc<AtomicUsize>) {
            let counter = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    handle,
                    extensions,
                    initialised: Arc::clone(&counter),
                    finished: Arc::new(AtomicUsize::new(0)),
                    start_delay: Duration::ZERO,
                },
                counter,
            )
        }

        fn finish_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.finished)
        }
    }

    impl EngineFactory for MockFactory {
        fn handle(&self) -> &'static str {
            self.handle
        }
        fn extensions(&self) -> &'static [&'static str] {
            self.extensions
        }
        fn config_keys(&self) -> &'static [&'static str] {
            &["cache"]
        }
        fn create(&self, _: EngineStartup) -> Result<Box<dyn TemplateEngine>, EngineError> {
            Ok(Box::new(MockEngine {
                handle: self.handle,
                initialised: Arc::clone(&self.initialised),
                finished: Arc::clone(&self.finished),
                start_delay: self.start_delay,
            }))
        }
    }

    fn params(name: &str, namespace: &str, ext: &str) -> TemplateParams {
        TemplateParams {
            name: name.to_string(),
            namespace: namespace.to_string(),
            extension: ext.to_string(),
            source: "source".to_string(),
            path: PathBuf::from(format!("{name}{ext}")),
            additional: Vec::new(),
        }
    }

    fn registry_with(factories: Vec<Box<dyn EngineFactory>>) -> EngineRegistry {
        let mut registry = EngineRegistry::new();
        registry.load_engines(factories, &AppConfig::default());
        registry
    }

    #[tokio::test]
    async fn test_lazy_start_on_first_template() {
        let (factory, counter) = MockFactory::new("dust", &[".dust"]);
        let registry = registry_with(vec![Box::new(factory)]);

        // Registered but never instantiated
        assert!(!registry.registration("dust").unwrap().started());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        registry.load_template(params("home", "", ".dust")).await.unwrap();
        assert!(registry.registration("dust").unwrap().started());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Second template for the same engine does not restart it
        registry.load_template(params("about", "", ".dust")).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_loads_start_engine_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factory = MockFactory {
            handle: "dust",
            extensions: &[".dust"],
            initialised: Arc::clone(&counter),
            finished: Arc::new(AtomicUsize::new(0)),
            start_delay: Duration::from_millis(50),
        };
        let registry = Arc::new(registry_with(vec![Box::new(factory)]));

        let a = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.load_template(params("a", "", ".dust")).await })
        };
        let b = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.load_template(params("b", "", ".dust")).await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1, "engine must start exactly once");
        assert_eq!(registry.template_count(), 2);
    }

    #[tokio::test]
    async fn test_extension_tie_break_first_registered_wins() {
        let (first, _) = MockFactory::new("first", &[".foo"]);
        let (second, _) = MockFactory::new("second", &[".foo"]);
        let registry = registry_with(vec![Box::new(first), Box::new(second)]);

        for _ in 0..5 {
            let winner = registry.find_engine_for_extension(".foo").unwrap();
            assert_eq!(winner.handle, "first");
        }
    }

    #[tokio::test]
    async fn test_duplicate_handle_ignored_with_warning() {
        let (a, _) = MockFactory::new("dust", &[".dust"]);
        let (b, _) = MockFactory::new("dust", &[".dst"]);
        let registry = registry_with(vec![Box::new(a), Box::new(b)]);

        assert_eq!(registry.handles(), vec!["dust"]);
        // The surviving registration is the first one
        assert!(registry.claims_extension(".dust"));
        assert!(!registry.claims_extension(".dst"));
    }

    #[tokio::test]
    async fn test_unknown_config_keys_exclude_engine() {
        let config = AppConfig::from_str(
            r#"
            [engines.dust]
            cache = true
            bogus = 1
            "#,
        )
        .unwrap();

        let (factory, _) = MockFactory::new("dust", &[".dust"]);
        let mut registry = EngineRegistry::new();
        registry.load_engines(vec![Box::new(factory)], &config);
        assert!(registry.handles().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_template_is_noop() {
        let (factory, _) = MockFactory::new("dust", &[".dust"]);
        let registry = registry_with(vec![Box::new(factory)]);

        registry.load_template(params("home", "", ".dust")).await.unwrap();
        let name = registry.load_template(params("home", "", ".dust")).await.unwrap();

        assert_eq!(name, "home");
        assert_eq!(registry.template_count(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_extension_is_per_file_error() {
        let (factory, counter) = MockFactory::new("dust", &[".dust"]);
        let registry = registry_with(vec![Box::new(factory)]);

        let err = registry.load_template(params("style", "", ".scss")).await.unwrap_err();
        assert!(matches!(err, EngineError::Resolution { .. }));
        // The miss must not start any engine
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_two_engines_coexist_with_namespaces() {
        let (dust, dust_counter) = MockFactory::new("dust", &[".dust"]);
        let (hbs, hbs_counter) = MockFactory::new("hbs", &[".hbs"]);
        let registry = registry_with(vec![Box::new(dust), Box::new(hbs)]);

        registry.load_template(params("page", "", ".dust")).await.unwrap();
        assert_eq!(dust_counter.load(Ordering::SeqCst), 1);
        assert_eq!(hbs_counter.load(Ordering::SeqCst), 0);

        registry.load_template(params("page", "hbs", ".hbs")).await.unwrap();
        assert_eq!(hbs_counter.load(Ordering::SeqCst), 1);

        // Both entries coexist under distinct namespaces
        assert_eq!(registry.template_count(), 2);
        let out = registry.render("page", "", &serde_json::json!({})).await.unwrap();
        assert_eq!(out, "dust:page");
        let out = registry.render("page", "hbs", &serde_json::json!({})).await.unwrap();
        assert_eq!(out, "hbs:hbs:page");
    }

    #[tokio::test]
    async fn test_render_strips_claimed_extension() {
        let (factory, _) = MockFactory::new("dust", &[".dust"]);
        let registry = registry_with(vec![Box::new(factory)]);

        registry.load_template(params("home", "", ".dust")).await.unwrap();
        let out = registry.render("home.dust", "", &serde_json::json!({})).await.unwrap();
        assert_eq!(out, "dust:home");
    }

    #[tokio::test]
    async fn test_dangling_reference_reported_at_render() {
        let (factory, _) = MockFactory::new("dust", &[".dust"]);
        let registry = registry_with(vec![Box::new(factory)]);

        let err = registry.render("ghost", "", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTemplate(_)));
    }

    #[tokio::test]
    async fn test_finish_loading_runs_started_hooks_only() {
        let (dust, _) = MockFactory::new("dust", &[".dust"]);
        let dust_finished = dust.finish_counter();
        let (hbs, _) = MockFactory::new("hbs", &[".hbs"]);
        let hbs_finished = hbs.finish_counter();
        let registry = registry_with(vec![Box::new(dust), Box::new(hbs)]);

        registry.load_template(params("home", "", ".dust")).await.unwrap();
        registry.finish_loading().await;

        assert_eq!(dust_finished.load(Ordering::SeqCst), 1);
        assert_eq!(
            hbs_finished.load(Ordering::SeqCst),
            0,
            "unstarted engines must be skipped"
        );

        // Once per pass
        registry.finish_loading().await;
        assert_eq!(dust_finished.load(Ordering::SeqCst), 2);
        assert_eq!(hbs_finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_startup_additional_excludes_own_extensions() {
        use parking_lot::Mutex;

        struct CapturingFactory {
            captured: Arc<Mutex<Vec<PathBuf>>>,
        }

        impl EngineFactory for CapturingFactory {
            fn handle(&self) -> &'static str {
                "dust"
            }
            fn extensions(&self) -> &'static [&'static str] {
                &[".dust"]
            }
            fn create(&self, startup: EngineStartup) -> Result<Box<dyn TemplateEngine>, EngineError> {
                *self.captured.lock() = startup.additional.clone();
                Ok(Box::new(MockEngine {
                    handle: "dust",
                    initialised: Arc::new(AtomicUsize::new(0)),
                    finished: Arc::new(AtomicUsize::new(0)),
                    start_delay: Duration::ZERO,
                }))
            }
        }

        let captured = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(vec![Box::new(CapturingFactory {
            captured: Arc::clone(&captured),
        })]);

        let mut p = params("home", "", ".dust");
        p.additional = vec![
            PathBuf::from("home.dust"),
            PathBuf::from("nav.hbs"),
            PathBuf::from("style.css"),
        ];
        registry.load_template(p).await.unwrap();

        // Files the engine owns (.dust) never appear in its startup list
        let seen = captured.lock().clone();
        assert_eq!(seen, vec![PathBuf::from("nav.hbs"), PathBuf::from("style.css")]);
    }

    #[tokio::test]
    async fn test_clear_templates_rebuild_wholesale() {
        let (factory, counter) = MockFactory::new("dust", &[".dust"]);
        let registry = registry_with(vec![Box::new(factory)]);

        registry.load_template(params("home", "", ".dust")).await.unwrap();
        registry.clear_templates();
        assert_eq!(registry.template_count(), 0);

        // Reload registers again without restarting the engine
        registry.load_template(params("home", "", ".dust")).await.unwrap();
        assert_eq!(registry.template_count(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
