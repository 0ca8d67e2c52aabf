//! FileSystem Actor
//!
//! Watches the workspace directories and sends debounced reload messages.
//! Implements the "Watcher-First" pattern for zero event loss.
//!
//! Architecture:
//! ```text
//! Watcher → Debouncer (pure timing) → Classifier (policy) → ReloadMsg
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use super::messages::ReloadMsg;
use crate::config::AppConfig;
use crate::core::normalize_path;

/// Debounce configuration
const DEBOUNCE_MS: u64 = 300;
const RELOAD_COOLDOWN_MS: u64 = 800;

/// Check if path is a temp/backup file (editor artifacts)
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// FileSystem Actor - watches for file changes
pub struct FsActor {
    /// Channel to receive notify events (sync -> async bridge)
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    /// Watcher handle (must be kept alive)
    _watcher: RecommendedWatcher,
    /// Channel to send messages to the reload actor
    reload_tx: mpsc::Sender<ReloadMsg>,
    /// Debouncer state
    debouncer: Debouncer,
    /// Configuration, for classifying paths against workspace directories
    config: Arc<AppConfig>,
}

impl FsActor {
    /// Create a new FsActor with Watcher-First pattern
    ///
    /// The watcher starts immediately, buffering events while the caller
    /// runs the bootstrap pass. This eliminates the "vacuum period".
    pub fn new(
        paths: Vec<PathBuf>,
        reload_tx: mpsc::Sender<ReloadMsg>,
        config: Arc<AppConfig>,
    ) -> notify::Result<Self> {
        // Create sync channel for notify (it doesn't support async)
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        // Create and configure watcher IMMEDIATELY
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;

        // Start watching all paths (skip non-existent paths to handle race conditions)
        for path in &paths {
            if path.exists() {
                watcher.watch(path, RecursiveMode::Recursive)?;
            }
        }

        // Events are now buffering in notify_rx while caller bootstraps

        Ok(Self {
            notify_rx,
            _watcher: watcher,
            reload_tx,
            debouncer: Debouncer::new(),
            config,
        })
    }

    /// Run the actor event loop
    pub async fn run(self) {
        let notify_rx = self.notify_rx;
        let reload_tx = self.reload_tx;
        let config = self.config;
        let mut debouncer = self.debouncer;

        let (async_tx, mut async_rx) = tokio::sync::mpsc::channel::<notify::Event>(64);

        // Spawn a thread to poll notify events and send to async channel
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if async_tx.blocking_send(event).is_err() {
                            break; // Receiver dropped
                        }
                    }
                    Err(e) => crate::log!("watch"; "notify error: {}", e),
                }
            }
        });

        loop {
            tokio::select! {
                biased;
                Some(event) = async_rx.recv() => debouncer.add_event(&event),
                _ = tokio::time::sleep(debouncer.sleep_duration()) => {
                    if process_changes(&mut debouncer, &reload_tx, &config).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Process debounced file changes
///
/// Returns `Err(())` if the reload actor shut down
async fn process_changes(
    debouncer: &mut Debouncer,
    reload_tx: &mpsc::Sender<ReloadMsg>,
    config: &AppConfig,
) -> Result<(), ()> {
    // Must be serving to process events (check BEFORE taking to preserve events)
    if !crate::core::is_serving() {
        return Ok(());
    }

    // Raw events from the debouncer (pure timing)
    let Some(raw_events) = debouncer.take_if_ready() else {
        return Ok(());
    };

    let changes = correct_by_existence(raw_events);
    if changes.is_empty() {
        return Ok(());
    }

    for (path, kind) in &changes {
        crate::debug!("watch"; "{}: {}", kind.label(), path.display());
    }

    let messages = events_to_messages(&changes, config);
    for msg in messages {
        reload_tx.send(msg).await.map_err(|_| ())?;
    }

    Ok(())
}

/// Reconcile event kinds with actual filesystem state.
///
/// The watcher may report stale events (e.g., Created for a file that's
/// already been deleted, or Removed for a file that still exists after an
/// atomic save).
fn correct_by_existence(
    mut changes: FxHashMap<PathBuf, ChangeKind>,
) -> FxHashMap<PathBuf, ChangeKind> {
    let paths: Vec<_> = changes.keys().cloned().collect();
    for path in paths {
        let kind = changes[&path];
        let exists = path.exists();
        match kind {
            ChangeKind::Created if !exists => {
                crate::debug!("watch"; "discard created (gone): {}", path.display());
                changes.remove(&path);
            }
            ChangeKind::Modified if !exists => {
                crate::debug!("watch"; "upgrade modified->removed: {}", path.display());
                changes.insert(path, ChangeKind::Removed);
            }
            ChangeKind::Removed if exists => {
                crate::debug!("watch"; "downgrade removed->modified: {}", path.display());
                changes.insert(path, ChangeKind::Modified);
            }
            _ => {}
        }
    }
    changes
}

/// Which workspace directory a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileCategory {
    Pages,
    Partials,
    Events,
    Datasources,
    Routes,
    Other,
}

fn categorize_path(path: &Path, config: &AppConfig) -> FileCategory {
    let candidates = [
        (config.pages_dir(), FileCategory::Pages),
        (config.partials_dir(), FileCategory::Partials),
        (config.events_dir(), FileCategory::Events),
        (config.datasources_dir(), FileCategory::Datasources),
        (config.routes_dir(), FileCategory::Routes),
    ];
    for (dir, category) in candidates {
        if path.starts_with(&dir) {
            return category;
        }
    }
    FileCategory::Other
}

/// Collapse a batch of changes into the minimal reload message set.
///
/// Policy, per batch:
/// - pages changed: reload pages AND recompile templates (a single save can
///   touch both the schema and the template file next to it)
/// - datasources or events changed: reload pages only
/// - partials changed: recompile templates only
/// - routes changed: rebuild rewrites only
fn events_to_messages(
    changes: &FxHashMap<PathBuf, ChangeKind>,
    config: &AppConfig,
) -> Vec<ReloadMsg> {
    let mut pages = false;
    let mut definitions = false;
    let mut partials = false;
    let mut routes = false;

    for path in changes.keys() {
        match categorize_path(path, config) {
            FileCategory::Pages => pages = true,
            FileCategory::Partials => partials = true,
            FileCategory::Events | FileCategory::Datasources => definitions = true,
            FileCategory::Routes => routes = true,
            FileCategory::Other => {}
        }
    }

    let mut messages = Vec::new();
    if pages {
        messages.push(ReloadMsg::Pages { recompile: true });
    } else if definitions {
        messages.push(ReloadMsg::Pages { recompile: false });
    }
    if partials && !pages {
        // A pages reload already recompiles; avoid doing it twice per batch
        messages.push(ReloadMsg::Templates);
    }
    if routes {
        messages.push(ReloadMsg::Rewrites);
    }
    messages
}

// =============================================================================
// Change types
// =============================================================================

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

// =============================================================================
// Debouncer - Pure timing and event deduplication
// =============================================================================

/// Pure debouncer: only handles timing and event deduplication.
/// No business logic, no global state access.
struct Debouncer {
    /// Path → ChangeKind (dedup is free via HashMap key uniqueness)
    changes: FxHashMap<PathBuf, ChangeKind>,
    last_event: Option<std::time::Instant>,
    last_reload: Option<std::time::Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            changes: FxHashMap::default(),
            last_event: None,
            last_reload: None,
        }
    }

    /// Add a notify event, applying dedup rules:
    /// - Remove + Create/Modify → Create/Modify (file was restored)
    /// - Create/Modify + Remove → Remove (file was deleted)
    /// - Same type events: first event wins
    fn add_event(&mut self, event: &notify::Event) {
        use notify::EventKind;

        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Remove(_) => ChangeKind::Removed,
            EventKind::Modify(modify) => {
                // Ignore metadata-only changes (mtime/atime/chmod noise)
                // that could trigger endless reload loops
                if matches!(modify, notify::event::ModifyKind::Metadata(_)) {
                    return;
                }
                ChangeKind::Modified
            }
            _ => return,
        };

        for path in &event.paths {
            if is_temp_file(path) {
                continue;
            }

            let path = normalize_path(path);

            if let Some(&existing) = self.changes.get(&path) {
                // State transitions:
                // - Removed -> Created/Modified: restored, use new event
                // - Modified -> Removed: deleted, upgrade to Removed
                // - Created -> Removed: appeared then vanished, discard (no-op)
                // - otherwise: first event wins
                match (existing, kind) {
                    (ChangeKind::Removed, ChangeKind::Created | ChangeKind::Modified) => {
                        crate::debug!("watch"; "restore {}->{}: {}", existing.label(), kind.label(), path.display());
                        self.changes.insert(path, kind);
                    }
                    (ChangeKind::Modified, ChangeKind::Removed) => {
                        crate::debug!("watch"; "upgrade modified->removed: {}", path.display());
                        self.changes.insert(path, ChangeKind::Removed);
                    }
                    (ChangeKind::Created, ChangeKind::Removed) => {
                        crate::debug!("watch"; "discard created+removed: {}", path.display());
                        self.changes.remove(&path);
                    }
                    _ => {
                        continue;
                    }
                }
                self.last_event = Some(std::time::Instant::now());
                continue;
            }

            crate::debug!("watch"; "event {}: {}", kind.label(), path.display());
            self.changes.insert(path, kind);
            self.last_event = Some(std::time::Instant::now());
        }
    }

    /// Take raw events if debounce + cooldown elapsed.
    fn take_if_ready(&mut self) -> Option<FxHashMap<PathBuf, ChangeKind>> {
        if !self.is_ready() {
            return None;
        }

        let changes = std::mem::take(&mut self.changes);
        self.last_event = None;

        if changes.is_empty() {
            return None;
        }

        self.last_reload = Some(std::time::Instant::now());
        Some(changes)
    }

    fn is_ready(&self) -> bool {
        let Some(last_event) = self.last_event else {
            return false;
        };

        if last_event.elapsed() < Duration::from_millis(DEBOUNCE_MS) {
            return false;
        }

        if let Some(last_reload) = self.last_reload
            && last_reload.elapsed() < Duration::from_millis(RELOAD_COOLDOWN_MS)
        {
            return false;
        }

        !self.changes.is_empty()
    }

    /// Precise sleep duration until next possible ready time.
    fn sleep_duration(&self) -> Duration {
        let Some(last_event) = self.last_event else {
            return Duration::from_secs(86400);
        };

        let debounce_remaining =
            Duration::from_millis(DEBOUNCE_MS).saturating_sub(last_event.elapsed());

        let cooldown_remaining = self
            .last_reload
            .map(|t| Duration::from_millis(RELOAD_COOLDOWN_MS).saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO);

        debounce_remaining
            .max(cooldown_remaining)
            .max(Duration::from_millis(1))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, Event, EventKind, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    fn create(path: &str) -> Event {
        event(EventKind::Create(CreateKind::File), path)
    }

    fn modify(path: &str) -> Event {
        event(EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)), path)
    }

    fn remove(path: &str) -> Event {
        event(EventKind::Remove(RemoveKind::File), path)
    }

    #[test]
    fn test_temp_files_ignored() {
        assert!(is_temp_file(Path::new("/w/pages/home.json.swp")));
        assert!(is_temp_file(Path::new("/w/pages/home.json~")));
        assert!(is_temp_file(Path::new("/w/pages/.home.json")));
        assert!(!is_temp_file(Path::new("/w/pages/home.json")));
    }

    #[test]
    fn test_debouncer_dedup_same_path() {
        let mut d = Debouncer::new();
        d.add_event(&modify("/w/pages/home.json"));
        d.add_event(&modify("/w/pages/home.json"));
        assert_eq!(d.changes.len(), 1);
    }

    #[test]
    fn test_debouncer_created_then_removed_discards() {
        let mut d = Debouncer::new();
        d.add_event(&create("/w/pages/tmp.json"));
        d.add_event(&remove("/w/pages/tmp.json"));
        assert!(d.changes.is_empty());
    }

    #[test]
    fn test_debouncer_modified_then_removed_upgrades() {
        let mut d = Debouncer::new();
        d.add_event(&modify("/w/pages/home.json"));
        d.add_event(&remove("/w/pages/home.json"));
        let path = normalize_path(Path::new("/w/pages/home.json"));
        assert_eq!(d.changes[&path], ChangeKind::Removed);
    }

    #[test]
    fn test_debounce_window_not_ready_immediately() {
        let mut d = Debouncer::new();
        d.add_event(&modify("/w/pages/home.json"));
        assert!(d.take_if_ready().is_none());
    }

    #[test]
    fn test_classification_policy() {
        let mut config = AppConfig::default();
        config.root = PathBuf::from("/w");

        let mut changes = FxHashMap::default();
        changes.insert(PathBuf::from("/w/workspace/partials/header.html"), ChangeKind::Modified);
        let msgs = events_to_messages(&changes, &config);
        assert_eq!(msgs, vec![ReloadMsg::Templates]);

        changes.insert(PathBuf::from("/w/workspace/pages/home.json"), ChangeKind::Modified);
        let msgs = events_to_messages(&changes, &config);
        // Pages reload subsumes the partial recompile
        assert_eq!(msgs, vec![ReloadMsg::Pages { recompile: true }]);

        let mut changes = FxHashMap::default();
        changes.insert(PathBuf::from("/w/workspace/datasources/posts.json"), ChangeKind::Modified);
        changes.insert(PathBuf::from("/w/workspace/routes/redirects.json"), ChangeKind::Modified);
        let msgs = events_to_messages(&changes, &config);
        assert_eq!(
            msgs,
            vec![ReloadMsg::Pages { recompile: false }, ReloadMsg::Rewrites]
        );
    }

    #[test]
    fn test_unrelated_paths_produce_no_messages() {
        let mut config = AppConfig::default();
        config.root = PathBuf::from("/w");

        let mut changes = FxHashMap::default();
        changes.insert(PathBuf::from("/elsewhere/file.json"), ChangeKind::Modified);
        assert!(events_to_messages(&changes, &config).is_empty());
    }
}
