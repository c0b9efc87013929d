//! rosnet CLI: run a master or inspect a running graph.

mod cli;
mod commands;
mod table;

use crate::cli::{Cli, Commands};
use clap::Parser;
use colored::Colorize;
use rosnet_types::config::load_config;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref());
    let master_uri = cli.master.unwrap_or(config.node.master_uri);

    match cli.command {
        Commands::Master { host, port } => {
            let mut master = config.master;
            if let Some(host) = host {
                master.host = host;
            }
            if let Some(port) = port {
                master.port = port;
            }
            commands::master(master).await
        }
        Commands::Topics { subgraph } => commands::topics(&master_uri, &subgraph).await,
        Commands::Services => commands::services(&master_uri).await,
        Commands::Nodes => commands::nodes(&master_uri).await,
        Commands::Lookup { node } => commands::lookup(&master_uri, &node).await,
        Commands::Info { node } => commands::node_info(&master_uri, &node).await,
        Commands::Kill { node } => commands::kill(&master_uri, &node).await,
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} cannot start the async runtime: {e}", "error:".red().bold());
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}
