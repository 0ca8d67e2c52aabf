//! Actor message definitions.
//!
//! ```text
//! FsActor --ReloadMsg--> ReloadActor
//! ```

/// Messages to the reload actor.
///
/// One message per reload policy outcome. The watcher collapses a debounced
/// batch of file events into the minimal set of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadMsg {
    /// Re-derive routes from page schemas.
    ///
    /// `recompile` additionally rebuilds the template set; set when page
    /// directory contents changed (a schema edit may rename the template
    /// alongside), clear when only datasource or event definitions moved.
    Pages { recompile: bool },
    /// Rebuild the template set only (partial edits).
    Templates,
    /// Rebuild the rewrite set only.
    Rewrites,
    /// Shutdown
    Shutdown,
}
