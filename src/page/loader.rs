//! Page directory scanning.
//!
//! Scans the pages directory non-recursively for `.json` schema files and
//! derives a [`PageDescriptor`] per file. A malformed file yields a
//! [`LoadError`] naming it and never aborts the batch.

use std::fs;
use std::path::Path;

use super::{LoadError, PageDescriptor, PageSchema, SCHEMA_EXTENSION};
use crate::debug;

/// Result of one directory scan: derived descriptors plus the per-file
/// failures encountered along the way.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub descriptors: Vec<PageDescriptor>,
    pub errors: Vec<LoadError>,
}

impl ScanOutcome {
    /// All paths derived by the successful descriptors.
    pub fn derived_paths(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .flat_map(|d| d.paths.iter().cloned())
            .collect()
    }
}

/// Scan `dir` for page-schema files and derive descriptors.
///
/// Non-recursive; files without the schema extension are skipped silently.
/// Safe to call repeatedly: descriptors are derived from the current
/// directory contents alone, so a reload pass replaces previous results
/// wholesale. A missing directory yields an empty outcome.
pub fn load_directory(dir: &Path) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();

    for path in schema_files(dir) {
        match load_file(&path) {
            Ok(descriptor) => outcome.descriptors.push(descriptor),
            Err(err) => outcome.errors.push(err),
        }
    }

    debug!(
        "pages";
        "scanned {}: {} page(s), {} error(s)",
        dir.display(),
        outcome.descriptors.len(),
        outcome.errors.len()
    );
    outcome
}

/// Schema files directly under `dir`, in sorted order.
///
/// Deterministic load order regardless of directory iteration order.
/// An unreadable or missing directory yields an empty list.
pub fn schema_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            debug!("pages"; "directory {} not readable, skipping", dir.display());
            return Vec::new();
        }
    };

    let mut files: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(SCHEMA_EXTENSION))
        })
        .collect();
    files.sort();
    files
}

/// Parse one schema file into a descriptor.
fn load_file(path: &Path) -> Result<PageDescriptor, LoadError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let schema: PageSchema =
        serde_json::from_str(&content).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    PageDescriptor::from_schema(&name, path.to_path_buf(), schema)
}

// ============================================================================
// Tests
// ============================================================================
