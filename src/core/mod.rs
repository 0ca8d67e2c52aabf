//! Core process state and shared helpers.

mod state;

pub use state::{is_serving, is_shutdown, register_server, set_serving, setup_shutdown_handler};

use std::path::{Path, PathBuf};

/// Normalize a path for identity comparison (watcher registration, dedup).
///
/// Canonicalizes when possible; otherwise makes the path absolute against
/// the current working directory without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relative_is_absolute() {
        let normalized = normalize_path(Path::new("some/relative/dir"));
        assert!(normalized.is_absolute());
    }

    #[test]
    fn test_normalize_is_stable() {
        let a = normalize_path(Path::new("x/y"));
        let b = normalize_path(Path::new("x/y"));
        assert_eq!(a, b);
    }
}
