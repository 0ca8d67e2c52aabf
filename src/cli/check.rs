//! `pagoda check` - validate the workspace without serving.
//!
//! Runs the same load passes as a cold start and reports what they derive:
//! registered engines, loaded templates, page routes, rewrite rules, and
//! every per-file error. Each page's template reference is resolved against
//! the loaded template set, so a dangling reference fails the check here
//! instead of surfacing as a 500 at request time. Exits non-zero when any
//! schema fails to load or any reference dangles.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::app::App;
use crate::config::AppConfig;
use crate::page::{PageDescriptor, loader};
use crate::route::RewriteSet;

pub fn run_check(config: Arc<AppConfig>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let app = App::new(Arc::clone(&config));

    println!("{}", "engines".bold());
    for handle in app.engines.handles() {
        println!("  {handle}");
    }

    let templates = rt.block_on(app.load_templates(false));
    println!("{} ({templates} loaded)", "templates".bold());

    let outcome = loader::load_directory(&config.pages_dir());
    println!("{} ({} derived)", "routes".bold(), outcome.descriptors.len());
    for descriptor in &outcome.descriptors {
        for path in &descriptor.paths {
            let mut line = format!("  {} -> {}", path, descriptor.template);
            if let Some(constraint) = &descriptor.constraint {
                line.push_str(&format!("  [{constraint:?}]"));
            }
            println!("{line}");
        }
    }

    let rewrites = RewriteSet::load(&config.routes_dir());
    println!("{} ({} rules)", "rewrites".bold(), rewrites.len());

    let dangling = dangling_templates(&app, &outcome.descriptors);

    let failures = outcome.errors.len() + dangling.len();
    if failures == 0 {
        println!("{}", "ok".green().bold());
        return Ok(());
    }

    for err in &outcome.errors {
        eprintln!("{} {err}", "error:".red().bold());
    }
    for (source, template) in &dangling {
        eprintln!(
            "{} {} references template `{}` which no engine loaded",
            "error:".red().bold(),
            source.display(),
            template
        );
    }
    anyhow::bail!("{failures} page(s) failed the check")
}

/// Descriptors whose template reference resolves to nothing.
///
/// Uses the same resolution as request-time rendering (exact name, then
/// claimed-extension stripping), so a clean check implies every derived
/// route can render.
fn dangling_templates(app: &App, descriptors: &[PageDescriptor]) -> Vec<(PathBuf, String)> {
    descriptors
        .iter()
        .filter(|d| !app.engines.has_template(&d.template, ""))
        .map(|d| (d.source.clone(), d.template.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_workspace(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join("workspace").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_dangling_template_reference_detected() {
        let dir = TempDir::new().unwrap();
        write_workspace(
            &dir,
            "pages/home.json",
            r#"{ "page": { "template": "home.html" } }"#,
        );
        write_workspace(&dir, "pages/home.html", "ok");
        write_workspace(
            &dir,
            "pages/ghost.json",
            r#"{ "page": { "template": "missing.html" } }"#,
        );

        let mut config = AppConfig::default();
        config.root = dir.path().to_path_buf();
        let app = App::new(Arc::new(config));
        app.load_templates(false).await;

        let outcome = loader::load_directory(&app.config.pages_dir());
        let dangling = dangling_templates(&app, &outcome.descriptors);

        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].1, "missing.html");
        assert!(dangling[0].0.ends_with("ghost.json"));
    }

    #[tokio::test]
    async fn test_resolvable_references_pass() {
        let dir = TempDir::new().unwrap();
        write_workspace(
            &dir,
            "pages/home.json",
            r#"{ "page": { "template": "home.html" } }"#,
        );
        write_workspace(&dir, "pages/home.html", "ok");

        let mut config = AppConfig::default();
        config.root = dir.path().to_path_buf();
        let app = App::new(Arc::new(config));
        app.load_templates(false).await;

        let outcome = loader::load_directory(&app.config.pages_dir());
        assert!(dangling_templates(&app, &outcome.descriptors).is_empty());
    }
}
