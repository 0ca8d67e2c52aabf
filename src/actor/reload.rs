//! Reload Actor
//!
//! Applies reload messages to the application context. Passes are full
//! re-derivations of the affected subsystem; a pass that fails leaves the
//! previous state serving and reports via the watch status line.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::messages::ReloadMsg;
use crate::app::App;
use crate::logger::{status_error, status_success};

pub struct ReloadActor {
    rx: mpsc::Receiver<ReloadMsg>,
    app: Arc<App>,
}

impl ReloadActor {
    pub fn new(rx: mpsc::Receiver<ReloadMsg>, app: Arc<App>) -> Self {
        Self { rx, app }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            crate::debug!("reload"; "{:?}", msg);
            match msg {
                ReloadMsg::Pages { recompile } => self.reload_pages(recompile).await,
                ReloadMsg::Templates => self.reload_templates().await,
                ReloadMsg::Rewrites => self.reload_rewrites(),
                ReloadMsg::Shutdown => break,
            }
        }
        crate::debug!("reload"; "stopped");
    }

    // Pages first, templates after: rendering resolves template names the
    // page pass derived.
    async fn reload_pages(&self, recompile: bool) {
        let count = self.app.load_pages(true);
        if recompile {
            self.app.load_templates(true).await;
        }
        if self.app.routes.is_empty() && count == 0 {
            status_error("reload", "no pages derived, keeping previous routes");
        } else {
            status_success(&format!("reloaded {count} page(s)"));
        }
    }

    async fn reload_templates(&self) {
        let count = self.app.load_templates(true).await;
        status_success(&format!("recompiled {count} template(s)"));
    }

    fn reload_rewrites(&self) {
        let count = self.app.load_rewrites();
        status_success(&format!("reloaded {count} rewrite rule(s)"));
    }
}
