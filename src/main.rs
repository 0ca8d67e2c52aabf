//! Pagoda - a page-serving middle tier.
//!
//! Turns a workspace of JSON page schemas into live HTTP routes rendered
//! through pluggable template engines, with hot reload in watch mode.

#![allow(dead_code)]

mod actor;
mod app;
mod cli;
mod config;
mod core;
mod engine;
mod logger;
mod page;
mod route;
mod serve;

use std::sync::Arc;

use anyhow::Result;
use clap::{ColorChoice, Parser};

use app::App;
use cli::{Cli, Commands};
use config::AppConfig;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let mut config = AppConfig::load(&cli.config)?;

    match &cli.command {
        Commands::Serve {
            interface,
            port,
            watch,
        } => {
            if let Some(interface) = interface {
                config.server.interface = *interface;
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(watch) = watch {
                config.server.watch = *watch;
            }
            serve_pages(Arc::new(config))
        }
        Commands::Check => cli::check::run_check(Arc::new(config)),
    }
}

/// Bind first, then bootstrap in the background: early requests get a
/// loading response instead of connection refused.
fn serve_pages(config: Arc<AppConfig>) -> Result<()> {
    config.ensure_workspace()?;

    let app = Arc::new(App::new(config));
    let bound_server = serve::bind_server(&app)?;
    bound_server.run(app)
}
