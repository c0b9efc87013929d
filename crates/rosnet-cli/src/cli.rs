//! Clap CLI definitions for rosnet.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  rosnet master                 Run a master on port 11311
  rosnet topics                 List published topics and their types
  rosnet nodes                  List every node known to the master
  rosnet info /talker           Show what a node publishes and subscribes to
  rosnet kill /talker           Ask a node to shut down";

/// rosnet: a master and graph inspection tools.
#[derive(Parser)]
#[command(name = "rosnet", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default: ~/.rosnet/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Master URI, overriding the config file.
    #[arg(long, global = true)]
    pub master: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a master until Ctrl+C.
    Master {
        /// Host to bind and advertise.
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,
    },
    /// List published topics.
    Topics {
        /// Only topics under this namespace.
        #[arg(default_value = "")]
        subgraph: String,
    },
    /// List services and their providers.
    Services,
    /// List nodes with at least one registration.
    Nodes,
    /// Print the control URI of a node.
    Lookup {
        node: String,
    },
    /// Show a node's publications, subscriptions and connections.
    Info {
        node: String,
    },
    /// Ask a node to shut down.
    Kill {
        node: String,
    },
}
