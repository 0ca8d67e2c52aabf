//! Application configuration management for `pagoda.toml`.
//!
//! # Sections
//!
//! | Section             | Purpose                                        |
//! |---------------------|------------------------------------------------|
//! | `[server]`          | HTTP server (interface, port, watch)           |
//! | `[paths]`           | Workspace directories (pages, partials, ...)   |
//! | `[engines.<handle>]`| Per-engine configuration blocks (free-form)    |

mod error;

pub use error::{ConfigDiagnostic, ConfigDiagnostics, ConfigError};

use crate::log;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    net::IpAddr,
    path::{Path, PathBuf},
};

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "pagoda.toml";

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing pagoda.toml
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Workspace directory layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Per-engine configuration blocks, keyed by engine handle.
    ///
    /// Contents are opaque here; each block is validated against the
    /// owning engine's declared key set when engines are loaded.
    #[serde(default)]
    pub engines: BTreeMap<String, toml::Table>,
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network interface to bind
    pub interface: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Watch workspace directories and reload on change
    pub watch: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            watch: true,
        }
    }
}

/// `[paths]` section - workspace directories, relative to the project root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Page schema files and page templates
    pub pages: PathBuf,
    /// Shared partial templates
    pub partials: PathBuf,
    /// Event handler definitions
    pub events: PathBuf,
    /// Data source definitions
    pub datasources: PathBuf,
    /// Redirect/rewrite rule files
    pub routes: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pages: PathBuf::from("workspace/pages"),
            partials: PathBuf::from("workspace/partials"),
            events: PathBuf::from("workspace/events"),
            datasources: PathBuf::from("workspace/datasources"),
            routes: PathBuf::from("workspace/routes"),
        }
    }
}

impl AppConfig {
    /// Load configuration from a config file path.
    ///
    /// A missing file yields the default configuration rooted at the file's
    /// parent directory, so a bare `pagoda serve` works in an empty project.
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            Self::from_path(config_path)?
        } else {
            log!("config"; "no {} found, using defaults", config_path.display());
            Self::default()
        };

        config.config_path = config_path.to_path_buf();
        config.root = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            });

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;

        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }

        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    /// Print warning about unknown fields.
    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring:", display_path);
        for field in fields {
            eprintln!("- {}", field);
        }
    }

    /// Validate the loaded configuration.
    fn validate(&self) -> Result<()> {
        let mut diags = ConfigDiagnostics::new();

        if self.server.port == 0 {
            diags.error("server.port", "port must be non-zero");
        }

        // Workspace directories must stay inside the project root: they are
        // created on startup and watched recursively.
        for (field, path) in self.workspace_dirs() {
            if path.is_absolute() {
                diags.error_with_hint(
                    field,
                    format!("`{}` must be relative to the project root", path.display()),
                    "use a path like \"workspace/pages\"",
                );
            }
        }

        diags
            .into_result()
            .map_err(|d| anyhow::Error::from(ConfigError::Diagnostics(d)))
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        &self.root
    }

    /// Join a path with the root directory.
    pub fn root_join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    /// Workspace directory fields as (config field, relative path) pairs.
    fn workspace_dirs(&self) -> [(&'static str, &Path); 5] {
        [
            ("paths.pages", &self.paths.pages),
            ("paths.partials", &self.paths.partials),
            ("paths.events", &self.paths.events),
            ("paths.datasources", &self.paths.datasources),
            ("paths.routes", &self.paths.routes),
        ]
    }

    /// Absolute path of the pages directory.
    pub fn pages_dir(&self) -> PathBuf {
        self.root_join(&self.paths.pages)
    }

    /// Absolute path of the partials directory.
    pub fn partials_dir(&self) -> PathBuf {
        self.root_join(&self.paths.partials)
    }

    /// Absolute path of the events directory.
    pub fn events_dir(&self) -> PathBuf {
        self.root_join(&self.paths.events)
    }

    /// Absolute path of the datasources directory.
    pub fn datasources_dir(&self) -> PathBuf {
        self.root_join(&self.paths.datasources)
    }

    /// Absolute path of the routes (rewrite rules) directory.
    pub fn routes_dir(&self) -> PathBuf {
        self.root_join(&self.paths.routes)
    }

    /// Create all workspace directories that don't exist yet.
    pub fn ensure_workspace(&self) -> Result<()> {
        for (_, rel) in self.workspace_dirs() {
            let dir = self.root_join(rel);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Configuration block for an engine handle, converted to JSON.
    ///
    /// Returns an empty object when no `[engines.<handle>]` block exists.
    pub fn engine_config(&self, handle: &str) -> serde_json::Value {
        self.engines
            .get(handle)
            .map(|table| toml_table_to_json(table))
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }
}

/// Convert a TOML table to a JSON value for engine consumption.
fn toml_table_to_json(table: &toml::Table) -> serde_json::Value {
    serde_json::to_value(table).unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
}

// ============================================================================
// Tests
// ============================================================================
