//! Route registry - the live `path → component` table.
//!
//! Entries are an explicit ordered list of route predicates tried in
//! registration order. Each candidate either matches (path + constraint +
//! verb) or falls through to the next; falling through is normal control
//! flow, never an error. The `/index` page is special: it mounts at the
//! root as the catch-all default, matching any path and any method.
//!
//! The table is the only mutable routing state. All mutations happen in one
//! write-lock critical section, so a concurrent request observes either the
//! pre-reload or the post-reload binding, never a torn state.

pub mod rewrite;

pub use rewrite::{RewriteRule, RewriteSet};

use std::borrow::Cow;
use std::sync::Arc;

use parking_lot::RwLock;
use percent_encoding::percent_decode_str;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::debug;
use crate::engine::{EngineError, EngineRegistry};
use crate::page::{Constraint, PageDescriptor};

/// Catch-all path marker.
pub const INDEX_PATH: &str = "/index";

// ============================================================================
// RequestInfo
// ============================================================================

/// Transport-independent view of one incoming request.
///
/// Dispatch and constraint tests run against this, keeping the table
/// testable without sockets.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Lower-cased HTTP verb.
    pub method: String,
    /// Request path without the query string, trailing slash stripped.
    pub path: String,
    /// Decoded query parameters.
    pub query: FxHashMap<String, String>,
    /// Headers with lower-cased names.
    pub headers: FxHashMap<String, String>,
}

impl RequestInfo {
    /// Build from a raw method and request URL.
    pub fn new(method: &str, url: &str) -> Self {
        let (path, query_str) = match url.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (url, None),
        };

        let mut query = FxHashMap::default();
        if let Some(raw) = query_str {
            for pair in raw.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                query.insert(decode(key), decode(value));
            }
        }

        Self {
            method: method.to_ascii_lowercase(),
            path: normalize_request_path(&decode(path)),
            query,
            headers: FxHashMap::default(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }
}

fn decode(input: &str) -> String {
    percent_decode_str(input)
        .decode_utf8()
        .unwrap_or(Cow::Borrowed(input))
        .into_owned()
}

/// Strip the trailing slash (except the root itself).
fn normalize_request_path(path: &str) -> String {
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

impl Constraint {
    /// Whether a request satisfies this predicate.
    pub fn allows(&self, req: &RequestInfo) -> bool {
        match self {
            Self::QueryParam(key) => req.query.contains_key(key),
            Self::Header(name) => req.headers.contains_key(name),
        }
    }
}

// ============================================================================
// Component
// ============================================================================

/// Request handler bound to one page descriptor.
///
/// Owned exclusively by the route table; its lifecycle is tied 1:1 to the
/// descriptor's path set.
#[derive(Debug)]
pub struct Component {
    pub descriptor: PageDescriptor,
}

impl Component {
    pub fn new(descriptor: PageDescriptor) -> Self {
        Self { descriptor }
    }

    /// Whether this component handles the verb (case-insensitive).
    pub fn handles(&self, method: &str) -> bool {
        let method = method.to_ascii_lowercase();
        self.descriptor.methods.iter().any(|m| *m == method)
    }

    /// Render this page for a request.
    ///
    /// The template reference is resolved now, not at load time; a dangling
    /// reference surfaces as a render error.
    pub async fn respond(
        &self,
        req: &RequestInfo,
        engines: &EngineRegistry,
    ) -> Result<String, EngineError> {
        let context = self.render_context(req);
        engines.render(&self.descriptor.template, "", &context).await
    }

    /// Build the JSON render context for a request.
    fn render_context(&self, req: &RequestInfo) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        for (key, value) in &self.descriptor.extra {
            root.insert(key.clone(), value.clone());
        }
        root.insert(
            "page".to_string(),
            serde_json::json!({ "name": self.descriptor.name }),
        );
        root.insert("path".to_string(), serde_json::json!(req.path));
        root.insert("method".to_string(), serde_json::json!(req.method));
        root.insert(
            "query".to_string(),
            serde_json::to_value(
                req.query
                    .iter()
                    .collect::<std::collections::BTreeMap<_, _>>(),
            )
            .unwrap_or_default(),
        );
        serde_json::Value::Object(root)
    }
}

// ============================================================================
// RouteTable
// ============================================================================

/// One `path → component` binding.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub path: String,
    constraint: Option<Constraint>,
    pub component: Arc<Component>,
}

#[derive(Debug, Default)]
struct TableInner {
    /// Registration order doubles as dispatch order.
    entries: Vec<RouteEntry>,
    /// The `/index` component, mounted at the root.
    catch_all: Option<Arc<Component>>,
}

/// The live routing table.
#[derive(Debug, Default)]
pub struct RouteTable {
    inner: RwLock<TableInner>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a component to every path of its descriptor.
    ///
    /// On a reload pass the existing binding at each path is evicted and
    /// the replacement installed inside one critical section, so the
    /// dispatch layer never observes a window where the path resolves to
    /// neither handler. Outside a reload, an existing binding wins and the
    /// add is a silent no-op (redundant scans must not double-register).
    pub fn add_component(
        &self,
        descriptor: &PageDescriptor,
        component: Arc<Component>,
        is_reload: bool,
    ) {
        for path in &descriptor.paths {
            let mut inner = self.inner.write();

            if path == INDEX_PATH {
                if inner.catch_all.is_none() || is_reload {
                    inner.catch_all = Some(Arc::clone(&component));
                    debug!("routes"; "mounted catch-all from `{}`", descriptor.name);
                } else {
                    debug!("routes"; "catch-all already bound, skipping `{}`", descriptor.name);
                }
                continue;
            }

            match inner.entries.iter_mut().find(|e| e.path == *path) {
                Some(existing) if is_reload => {
                    // Evict-then-install as one unit: replacing the slot in
                    // place under the write lock
                    *existing = RouteEntry {
                        path: path.clone(),
                        constraint: descriptor.constraint.clone(),
                        component: Arc::clone(&component),
                    };
                    debug!("routes"; "replaced {}", path);
                }
                Some(_) => {
                    debug!("routes"; "{} already bound, skipping", path);
                }
                None => {
                    inner.entries.push(RouteEntry {
                        path: path.clone(),
                        constraint: descriptor.constraint.clone(),
                        component: Arc::clone(&component),
                    });
                    debug!("routes"; "mounted {}", path);
                }
            }
        }
    }

    /// Detach the handler at `path` and drop the table entry.
    /// Removing a non-existent path is a no-op.
    pub fn remove_component(&self, path: &str) {
        let mut inner = self.inner.write();
        if path == INDEX_PATH {
            inner.catch_all = None;
            return;
        }
        inner.entries.retain(|e| e.path != path);
    }

    /// Drop every binding whose path is not in `live`.
    ///
    /// Reload passes are full re-derivations: after installing the new
    /// descriptors, bindings for deleted schema files are swept here.
    pub fn retain_paths(&self, live: &FxHashSet<String>) {
        let mut inner = self.inner.write();
        inner.entries.retain(|e| live.contains(&e.path));
        if !live.contains(INDEX_PATH) {
            inner.catch_all = None;
        }
    }

    /// Resolve a request to a component.
    ///
    /// Candidates are tried in registration order; a failed constraint or a
    /// verb without a handler falls through to the next candidate, then to
    /// the catch-all (any path, any method), then to `None`.
    pub fn resolve(&self, req: &RequestInfo) -> Option<Arc<Component>> {
        let inner = self.inner.read();

        for entry in &inner.entries {
            if !path_matches(&entry.path, &req.path) {
                continue;
            }
            if let Some(constraint) = &entry.constraint
                && !constraint.allows(req)
            {
                continue;
            }
            if !entry.component.handles(&req.method) {
                continue;
            }
            return Some(Arc::clone(&entry.component));
        }

        inner.catch_all.as_ref().map(Arc::clone)
    }

    /// Number of non-catch-all bindings.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.entries.is_empty() && inner.catch_all.is_none()
    }

    /// Whether the catch-all is mounted.
    pub fn has_catch_all(&self) -> bool {
        self.inner.read().catch_all.is_some()
    }

    /// Bound paths in registration order (tests, `pagoda check`).
    pub fn paths(&self) -> Vec<String> {
        self.inner.read().entries.iter().map(|e| e.path.clone()).collect()
    }
}

/// Path-prefix match with a `/` boundary.
fn path_matches(entry_path: &str, request_path: &str) -> bool {
    request_path == entry_path
        || request_path
            .strip_prefix(entry_path)
            .is_some_and(|rest| rest.starts_with('/'))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{PageSchema, loader};
    use std::path::PathBuf;

    fn descriptor(name: &str, json: &str) -> PageDescriptor {
        let schema: PageSchema = serde_json::from_str(json).unwrap();
        PageDescriptor::from_schema(name, PathBuf::from(format!("{name}.json")), schema).unwrap()
    }

    fn component(name: &str, json: &str) -> (PageDescriptor, Arc<Component>) {
        let d = descriptor(name, json);
        let c = Arc::new(Component::new(d.clone()));
        (d, c)
    }

    fn get(path: &str) -> RequestInfo {
        RequestInfo::new("GET", path)
    }

    #[test]
    fn test_request_info_parsing() {
        let req = RequestInfo::new("POST", "/docs/?v=2&q=a%20b");
        assert_eq!(req.method, "post");
        assert_eq!(req.path, "/docs");
        assert_eq!(req.query["v"], "2");
        assert_eq!(req.query["q"], "a b");
    }

    #[test]
    fn test_first_writer_wins_outside_reload() {
        let table = RouteTable::new();
        let (d1, c1) = component("a", r#"{ "route": { "paths": ["/x"] }, "page": { "template": "a.html" } }"#);
        let (d2, c2) = component("b", r#"{ "route": { "paths": ["/x"] }, "page": { "template": "b.html" } }"#);

        table.add_component(&d1, Arc::clone(&c1), false);
        table.add_component(&d2, Arc::clone(&c2), false);

        assert_eq!(table.len(), 1);
        let resolved = table.resolve(&get("/x")).unwrap();
        assert_eq!(resolved.descriptor.name, "a");
    }

    #[test]
    fn test_reload_replaces_binding() {
        let table = RouteTable::new();
        let (d1, c1) = component("a", r#"{ "route": { "paths": ["/x"] }, "page": { "template": "a.html" } }"#);
        let (d2, c2) = component("b", r#"{ "route": { "paths": ["/x"] }, "page": { "template": "b.html" } }"#);

        table.add_component(&d1, c1, false);
        table.add_component(&d2, c2, true);

        assert_eq!(table.len(), 1, "no duplicate binding after reload");
        let resolved = table.resolve(&get("/x")).unwrap();
        assert_eq!(resolved.descriptor.name, "b");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table = RouteTable::new();
        let (d, c) = component("a", r#"{ "route": { "paths": ["/x"] }, "page": { "template": "a.html" } }"#);
        table.add_component(&d, c, false);

        table.remove_component("/x");
        assert!(table.resolve(&get("/x")).is_none());
        table.remove_component("/x"); // no-op
        table.remove_component("/never-bound"); // no-op
    }

    #[test]
    fn test_index_mounts_catch_all() {
        let table = RouteTable::new();
        let (d, c) = component("home", r#"{ "route": { "paths": ["/index"] }, "page": { "template": "home.html" } }"#);
        table.add_component(&d, c, false);

        assert!(table.has_catch_all());
        // Root and arbitrary paths all land on the catch-all, any method
        assert_eq!(table.resolve(&get("/")).unwrap().descriptor.name, "home");
        assert_eq!(table.resolve(&get("/anything")).unwrap().descriptor.name, "home");
        assert_eq!(
            table
                .resolve(&RequestInfo::new("DELETE", "/"))
                .unwrap()
                .descriptor
                .name,
            "home"
        );
    }

    #[test]
    fn test_verb_without_handler_falls_through() {
        let table = RouteTable::new();
        let (d1, c1) = component(
            "get-only",
            r#"{ "route": { "paths": ["/x"] }, "page": { "template": "a.html", "methods": ["get"] } }"#,
        );
        let (d2, c2) = component(
            "both",
            r#"{ "route": { "paths": ["/x/sub"] }, "page": { "template": "b.html", "methods": ["get", "post"] } }"#,
        );
        table.add_component(&d1, c1, false);
        table.add_component(&d2, c2, false);

        // POST /x/sub: /x matches by prefix but has no post handler,
        // dispatch proceeds to the next candidate instead of erroring
        let resolved = table.resolve(&RequestInfo::new("POST", "/x/sub")).unwrap();
        assert_eq!(resolved.descriptor.name, "both");

        // POST /x with no further candidate: not found, not an error
        assert!(table.resolve(&RequestInfo::new("POST", "/x")).is_none());
    }

    #[test]
    fn test_failed_constraint_falls_through() {
        let table = RouteTable::new();
        let (d1, c1) = component(
            "gated",
            r#"{ "route": { "paths": ["/docs"], "constraint": "param:preview" }, "page": { "template": "a.html" } }"#,
        );
        let (d2, c2) = component("home", r#"{ "route": { "paths": ["/index"] }, "page": { "template": "b.html" } }"#);
        table.add_component(&d1, c1, false);
        table.add_component(&d2, c2, false);

        // Constraint satisfied: the gated component handles it
        let resolved = table.resolve(&get("/docs?preview=1")).unwrap();
        assert_eq!(resolved.descriptor.name, "gated");

        // Constraint failed: falls through to the catch-all
        let resolved = table.resolve(&get("/docs")).unwrap();
        assert_eq!(resolved.descriptor.name, "home");
    }

    #[test]
    fn test_header_constraint() {
        let table = RouteTable::new();
        let (d, c) = component(
            "gated",
            r#"{ "route": { "paths": ["/beta"], "constraint": "header:X-Beta" }, "page": { "template": "a.html" } }"#,
        );
        table.add_component(&d, c, false);

        assert!(table.resolve(&get("/beta")).is_none());
        let req = get("/beta").with_header("X-Beta", "1");
        assert!(table.resolve(&req).is_some());
    }

    #[test]
    fn test_dispatch_order_is_registration_order() {
        let table = RouteTable::new();
        let (d1, c1) = component("first", r#"{ "route": { "paths": ["/a"] }, "page": { "template": "a.html" } }"#);
        let (d2, c2) = component("second", r#"{ "route": { "paths": ["/a/b"] }, "page": { "template": "b.html" } }"#);
        table.add_component(&d1, c1, false);
        table.add_component(&d2, c2, false);

        // /a/b prefix-matches /a first; /a handles get, so it wins
        let resolved = table.resolve(&get("/a/b")).unwrap();
        assert_eq!(resolved.descriptor.name, "first");
    }

    #[test]
    fn test_retain_paths_sweeps_deleted_pages() {
        let table = RouteTable::new();
        let (d1, c1) = component("keep", r#"{ "route": { "paths": ["/keep"] }, "page": { "template": "a.html" } }"#);
        let (d2, c2) = component("drop", r#"{ "route": { "paths": ["/drop"] }, "page": { "template": "b.html" } }"#);
        let (d3, c3) = component("home", r#"{ "route": { "paths": ["/index"] }, "page": { "template": "c.html" } }"#);
        table.add_component(&d1, c1, false);
        table.add_component(&d2, c2, false);
        table.add_component(&d3, c3, false);

        let live: FxHashSet<String> = ["/keep".to_string()].into_iter().collect();
        table.retain_paths(&live);

        assert!(table.resolve(&get("/keep")).is_some());
        assert!(table.resolve(&get("/drop")).is_none());
        assert!(!table.has_catch_all());
    }

    #[test]
    fn test_path_prefix_boundary() {
        assert!(path_matches("/docs", "/docs"));
        assert!(path_matches("/docs", "/docs/intro"));
        assert!(!path_matches("/docs", "/docsx"));
        assert!(!path_matches("/docs", "/doc"));
    }

    #[tokio::test]
    async fn test_atomic_swap_under_concurrent_resolution() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let table = Arc::new(RouteTable::new());
        let (d1, c1) = component("old", r#"{ "route": { "paths": ["/x"] }, "page": { "template": "a.html" } }"#);
        table.add_component(&d1, c1, false);

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let table = Arc::clone(&table);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    // Every observation is exactly one of {old, new}
                    let resolved = table.resolve(&RequestInfo::new("GET", "/x")).unwrap();
                    assert!(matches!(resolved.descriptor.name.as_str(), "old" | "new"));
                }
            })
        };

        for _ in 0..200 {
            let (d2, c2) = component("new", r#"{ "route": { "paths": ["/x"] }, "page": { "template": "b.html" } }"#);
            table.add_component(&d2, c2, true);
            let (d1, c1) = component("old", r#"{ "route": { "paths": ["/x"] }, "page": { "template": "a.html" } }"#);
            table.add_component(&d1, c1, true);
        }

        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();
    }

    // End-to-end: the add/retain cycle a reload pass performs against a
    // real directory scan.
    #[test]
    fn test_loader_roundtrip_reload_replaces() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("home.json"),
            r#"{ "route": { "paths": ["/index"] }, "page": { "template": "home.html" } }"#,
        )
        .unwrap();

        let table = RouteTable::new();
        let install = |reload: bool| {
            let outcome = loader::load_directory(dir.path());
            let mut live = FxHashSet::default();
            for d in &outcome.descriptors {
                live.extend(d.paths.iter().cloned());
                let c = Arc::new(Component::new(d.clone()));
                table.add_component(d, c, reload);
            }
            if reload {
                table.retain_paths(&live);
            }
        };

        install(false);
        assert!(table.resolve(&get("/")).is_some());

        // Delete the schema and reload: the binding goes away
        std::fs::remove_file(dir.path().join("home.json")).unwrap();
        install(true);
        assert!(table.resolve(&get("/")).is_none());
    }
}
