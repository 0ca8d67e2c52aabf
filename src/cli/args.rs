//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Pagoda page server CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Enable verbose debug output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Config file path (default: pagoda.toml)
    #[arg(short = 'C', long, default_value = "pagoda.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the page server with hot reload
    #[command(visible_alias = "s")]
    Serve {
        /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
        #[arg(short, long)]
        interface: Option<std::net::IpAddr>,

        /// Port number to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable file watching for hot reload
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        watch: Option<bool>,
    },

    /// Validate the workspace: pages, templates, and rewrite rules
    #[command(visible_alias = "c")]
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_flags() {
        let cli = Cli::parse_from(["pagoda", "serve", "--port", "8080", "--watch", "false"]);
        match cli.command {
            Commands::Serve { port, watch, .. } => {
                assert_eq!(port, Some(8080));
                assert_eq!(watch, Some(false));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_check_alias() {
        let cli = Cli::parse_from(["pagoda", "c"]);
        assert!(matches!(cli.command, Commands::Check));
    }

    #[test]
    fn test_config_default() {
        let cli = Cli::parse_from(["pagoda", "check"]);
        assert_eq!(cli.config, PathBuf::from("pagoda.toml"));
    }
}
