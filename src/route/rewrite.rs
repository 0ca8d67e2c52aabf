//! URL rewrites loaded from route definition files.
//!
//! Each `.json` file in the routes directory carries a `rewrites` array of
//! `{ "from", "to", "status" }` rules. Rules apply before page dispatch and
//! answer with a redirect. The whole set is rebuilt on every reload pass and
//! swapped in as one unit.

use std::path::Path;

use serde::Deserialize;

use crate::debug;
use crate::log;
use crate::page::loader::schema_files;

/// One redirect rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RewriteRule {
    pub from: String,
    pub to: String,
    #[serde(default = "default_status")]
    pub status: u16,
}

fn default_status() -> u16 {
    302
}

#[derive(Debug, Deserialize)]
struct RewriteFile {
    #[serde(default)]
    rewrites: Vec<RewriteRule>,
}

/// The active rewrite rules, in file order.
#[derive(Debug, Default)]
pub struct RewriteSet {
    rules: Vec<RewriteRule>,
}

impl RewriteSet {
    /// Rebuild the set from every route file in `dir`.
    ///
    /// A missing directory yields an empty set. A malformed file is logged
    /// and skipped; the other files still contribute.
    pub fn load(dir: &Path) -> Self {
        let mut rules = Vec::new();

        for path in schema_files(dir) {
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    log!("routes"; "failed to read {}: {err}", path.display());
                    continue;
                }
            };
            let file: RewriteFile = match serde_json::from_str(&raw) {
                Ok(file) => file,
                Err(err) => {
                    log!("routes"; "failed to parse {}: {err}", path.display());
                    continue;
                }
            };
            for rule in file.rewrites {
                if !(300..400).contains(&rule.status) {
                    log!(
                        "routes";
                        "rewrite {} -> {} has non-redirect status {}, using 302",
                        rule.from, rule.to, rule.status
                    );
                    rules.push(RewriteRule { status: 302, ..rule });
                } else {
                    rules.push(rule);
                }
            }
        }

        debug!("routes"; "loaded {} rewrite rule(s)", rules.len());
        Self { rules }
    }

    /// First rule whose `from` matches the request path exactly.
    pub fn match_path(&self, path: &str) -> Option<&RewriteRule> {
        self.rules.iter().find(|r| r.from == path)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_yields_empty_set() {
        let dir = TempDir::new().unwrap();
        let set = RewriteSet::load(&dir.path().join("nope"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_load_and_match() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("redirects.json"),
            r#"{ "rewrites": [
                { "from": "/old", "to": "/new", "status": 301 },
                { "from": "/moved", "to": "/docs" }
            ] }"#,
        )
        .unwrap();

        let set = RewriteSet::load(dir.path());
        assert_eq!(set.len(), 2);

        let rule = set.match_path("/old").unwrap();
        assert_eq!(rule.to, "/new");
        assert_eq!(rule.status, 301);

        // Default status
        assert_eq!(set.match_path("/moved").unwrap().status, 302);

        assert!(set.match_path("/old/sub").is_none(), "exact match only");
    }

    #[test]
    fn test_malformed_file_does_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.json"), "{ not json").unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{ "rewrites": [{ "from": "/a", "to": "/b" }] }"#,
        )
        .unwrap();

        let set = RewriteSet::load(dir.path());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_non_redirect_status_clamped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("r.json"),
            r#"{ "rewrites": [{ "from": "/a", "to": "/b", "status": 200 }] }"#,
        )
        .unwrap();

        let set = RewriteSet::load(dir.path());
        assert_eq!(set.match_path("/a").unwrap().status, 302);
    }
}
