//! Actor Coordinator - wires up the hot-reload actor system.
//!
//! A thin orchestrator: creates channels, wires the watcher to the reload
//! actor, runs both until the shutdown signal. Reload policy lives in the
//! actors, not here.
//!
//! ```text
//! FsActor --> ReloadActor
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use crossbeam::channel::Receiver;
use tokio::sync::mpsc;

use super::fs::FsActor;
use super::messages::ReloadMsg;
use super::reload::ReloadActor;
use crate::app::App;
use crate::core::normalize_path;

/// Channel buffer size
const CHANNEL_BUFFER: usize = 32;

pub struct Coordinator {
    app: Arc<App>,
    /// Optional shutdown signal receiver
    shutdown_rx: Option<Receiver<()>>,
}

impl Coordinator {
    pub fn new(app: Arc<App>) -> Self {
        Self {
            app,
            shutdown_rx: None,
        }
    }

    /// Set shutdown signal receiver
    pub fn with_shutdown_signal(mut self, rx: Receiver<()>) -> Self {
        self.shutdown_rx = Some(rx);
        self
    }

    /// Run the actor system
    pub async fn run(mut self) -> Result<()> {
        let (reload_tx, reload_rx) = mpsc::channel::<ReloadMsg>(CHANNEL_BUFFER);

        let watch_paths = self.watch_paths();
        let fs_actor = FsActor::new(watch_paths, reload_tx.clone(), Arc::clone(&self.app.config))
            .map_err(|e| anyhow::anyhow!("watcher failed: {}", e))?;

        let reload_actor = ReloadActor::new(reload_rx, Arc::clone(&self.app));

        crate::debug!("actor"; "start");
        let shutdown_rx = self.shutdown_rx.take();

        let reload_handle = tokio::spawn(async move { reload_actor.run().await });
        let fs_handle = tokio::spawn(async move { fs_actor.run().await });

        if let Some(rx) = shutdown_rx {
            // The signal arrives on a sync channel; park a blocking task on
            // it instead of polling. A disconnected sender also means stop.
            let _ = tokio::task::spawn_blocking(move || rx.recv()).await;
            crate::debug!("actor"; "shutdown signal received");
        } else {
            tokio::select! {
                _ = fs_handle => {}
            }
        }

        // Let the reload actor drain before dropping it
        let _ = reload_tx.send(ReloadMsg::Shutdown).await;
        let _ = tokio::time::timeout(std::time::Duration::from_millis(500), reload_handle).await;

        crate::debug!("actor"; "stopped");
        Ok(())
    }

    /// Directories to watch, deduplicated after normalization.
    fn watch_paths(&self) -> Vec<PathBuf> {
        let config = &self.app.config;
        let mut paths: Vec<PathBuf> = Vec::new();

        for dir in [
            config.pages_dir(),
            config.partials_dir(),
            config.events_dir(),
            config.datasources_dir(),
            config.routes_dir(),
        ] {
            let dir = normalize_path(&dir);
            if !paths.contains(&dir) {
                paths.push(dir);
            }
        }
        paths
    }
}
