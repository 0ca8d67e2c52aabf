//! HTTP server with hot reload support.
//!
//! The request loop is synchronous (tiny_http + a small rayon pool); page
//! rendering is async, bridged per request through a shared tokio runtime
//! handle. The same runtime hosts the bootstrap pass and the watch actors.

mod lifecycle;
mod response;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use crossbeam::channel;
use tiny_http::{Request, Server};
use tokio::runtime::Handle;

use crate::actor::Coordinator;
use crate::app::App;
use crate::route::RequestInfo;
use crate::{debug, log};

/// Bound server ready to accept requests.
pub struct BoundServer {
    server: Arc<Server>,
    addr: SocketAddr,
    shutdown_rx: channel::Receiver<()>,
}

/// Bind the HTTP server without starting the request loop.
///
/// Binding first lets the bootstrap pass run in the background while early
/// requests get a loading response instead of connection refused.
pub fn bind_server(app: &App) -> Result<BoundServer> {
    let config = &app.config;
    let (server, addr) = lifecycle::bind_with_retry(config.server.interface, config.server.port)?;
    let server = Arc::new(server);

    let (shutdown_tx, shutdown_rx) = channel::unbounded::<()>();
    lifecycle::register_server_for_shutdown(Arc::clone(&server), shutdown_tx);

    log!("serve"; "http://{}", addr);

    Ok(BoundServer {
        server,
        addr,
        shutdown_rx,
    })
}

impl BoundServer {
    /// Get the bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the request loop (blocking).
    ///
    /// Spawns the bootstrap pass and (when watch is enabled) the actor
    /// system onto the runtime, then serves until shutdown.
    pub fn run(self, app: Arc<App>) -> Result<()> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let handle = rt.handle().clone();

        // Bootstrap in the background; set_serving flips requests from the
        // loading response to real dispatch
        {
            let app = Arc::clone(&app);
            handle.spawn(async move {
                if let Err(e) = app.bootstrap().await {
                    log!("init"; "bootstrap failed: {e}");
                    return;
                }
                if !crate::core::is_shutdown() {
                    crate::core::set_serving();
                    debug!("serve"; "bootstrap complete, serving");
                }
            });
        }

        let actor_handle = if app.config.server.watch {
            let coordinator =
                Coordinator::new(Arc::clone(&app)).with_shutdown_signal(self.shutdown_rx.clone());
            Some(handle.spawn(coordinator.run()))
        } else {
            None
        };

        run_request_loop(&self.server, &app, &handle);

        // Give the actor system a moment to drain before tearing down
        if let Some(actor_handle) = actor_handle {
            let _ = handle.block_on(async {
                tokio::time::timeout(std::time::Duration::from_secs(2), actor_handle).await
            });
        }
        rt.shutdown_timeout(std::time::Duration::from_secs(2));
        Ok(())
    }
}

fn run_request_loop(server: &Server, app: &Arc<App>, handle: &Handle) {
    // Thread pool so one slow render doesn't block other requests
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .expect("failed to create thread pool");

    for request in server.incoming_requests() {
        let app = Arc::clone(app);
        let handle = handle.clone();
        pool.spawn(move || {
            if let Err(e) = handle_request(request, &app, &handle) {
                log!("serve"; "request error: {e}");
            }
        });
    }
}

/// Handle a single HTTP request.
fn handle_request(request: Request, app: &App, handle: &Handle) -> Result<()> {
    // Early exit if shutdown requested
    if crate::core::is_shutdown() {
        return response::respond_unavailable(request);
    }

    if !crate::core::is_serving() {
        return response::respond_loading(request);
    }

    let info = request_info(&request);

    // Rewrites apply before page dispatch
    let rewrites = app.rewrites.load();
    if let Some(rule) = rewrites.match_path(&info.path) {
        debug!("serve"; "{} {} -> {} ({})", info.method, info.path, rule.to, rule.status);
        return response::respond_redirect(request, rule);
    }

    let Some(component) = app.routes.resolve(&info) else {
        debug!("serve"; "{} {} -> 404", info.method, info.path);
        return response::respond_not_found(request);
    };

    match handle.block_on(component.respond(&info, &app.engines)) {
        Ok(body) => response::respond_html(request, body),
        Err(e) => {
            log!("serve"; "render failed for {}: {e}", info.path);
            response::respond_error(request)
        }
    }
}

/// Build the dispatch view of a tiny_http request.
fn request_info(request: &Request) -> RequestInfo {
    let mut info = RequestInfo::new(request.method().as_str(), request.url());
    for header in request.headers() {
        info.headers.insert(
            header.field.as_str().as_str().to_ascii_lowercase(),
            header.value.to_string(),
        );
    }
    info
}
