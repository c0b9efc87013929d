//! Subcommand implementations.

use crate::table::Table;
use anyhow::{bail, Context};
use colored::Colorize;
use rosnet_master::MasterServer;
use rosnet_rpc::{MasterClient, SlaveClient};
use rosnet_types::config::MasterConfig;
use rosnet_types::topic::parse_uri;
use rosnet_types::GraphName;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::info;
use url::Url;

const CALLER_ID: &str = "/rosnet_cli";
const TIMEOUT: Duration = Duration::from_secs(10);

fn caller_id() -> anyhow::Result<GraphName> {
    Ok(GraphName::new(CALLER_ID)?)
}

fn master_client(master_uri: &str) -> anyhow::Result<MasterClient> {
    let uri = parse_uri(master_uri).with_context(|| format!("invalid master URI {master_uri}"))?;
    Ok(MasterClient::new(uri, caller_id()?, TIMEOUT)?)
}

async fn slave_client(master_uri: &str, node: &str) -> anyhow::Result<(GraphName, SlaveClient)> {
    let node = GraphName::new(node)?.to_global();
    let uri = master_client(master_uri)?
        .lookup_node(&node)
        .await
        .with_context(|| format!("cannot look up node {node}"))?;
    Ok((node, SlaveClient::new(uri, caller_id()?, TIMEOUT)?))
}

fn print_table(table: Table, empty: &str) {
    if table.is_empty() {
        println!("{}", empty.dimmed());
    } else {
        println!("{}", table.render());
    }
}

pub async fn master(config: MasterConfig) -> anyhow::Result<()> {
    let master = MasterServer::start(&config)
        .await
        .with_context(|| format!("cannot start master on {}:{}", config.host, config.port))?;
    println!("{} {}", "Master running at".green().bold(), master.uri());
    println!("Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received");
    master.shutdown();
    Ok(())
}

pub async fn topics(master_uri: &str, subgraph: &str) -> anyhow::Result<()> {
    let topics = master_client(master_uri)?
        .get_published_topics(subgraph)
        .await
        .context("cannot list topics")?;
    let mut table = Table::new(&["TOPIC", "TYPE"]);
    for (topic, type_name) in topics {
        table.add_row(vec![topic, type_name]);
    }
    print_table(table, "No published topics.");
    Ok(())
}

pub async fn services(master_uri: &str) -> anyhow::Result<()> {
    let state = master_client(master_uri)?
        .get_system_state()
        .await
        .context("cannot read system state")?;
    let mut table = Table::new(&["SERVICE", "PROVIDER"]);
    for (service, providers) in state.services {
        table.add_row(vec![service, providers.join(", ")]);
    }
    print_table(table, "No services.");
    Ok(())
}

pub async fn nodes(master_uri: &str) -> anyhow::Result<()> {
    let state = master_client(master_uri)?
        .get_system_state()
        .await
        .context("cannot read system state")?;
    let nodes: BTreeSet<String> = state
        .publishers
        .into_iter()
        .chain(state.subscribers)
        .chain(state.services)
        .flat_map(|(_, nodes)| nodes)
        .collect();
    let mut table = Table::new(&["NODE"]);
    for node in nodes {
        table.add_row(vec![node]);
    }
    print_table(table, "No nodes.");
    Ok(())
}

pub async fn lookup(master_uri: &str, node: &str) -> anyhow::Result<()> {
    let node = GraphName::new(node)?.to_global();
    let uri: Url = master_client(master_uri)?
        .lookup_node(&node)
        .await
        .with_context(|| format!("cannot look up node {node}"))?;
    println!("{uri}");
    Ok(())
}

pub async fn node_info(master_uri: &str, node: &str) -> anyhow::Result<()> {
    let (node, slave) = slave_client(master_uri, node).await?;
    let pid = slave.get_pid().await.context("node did not answer getPid")?;
    let publications = slave.get_publications().await?;
    let subscriptions = slave.get_subscriptions().await?;
    let bus = slave.get_bus_info().await?;

    println!("{} {node}", "Node".bold());
    println!("  URI:         {}", slave.uri());
    println!("  PID:         {pid}");
    println!("  Connections: {}", bus.len());

    let mut table = Table::new(&["DIRECTION", "TOPIC", "TYPE"]);
    for (topic, type_name) in publications {
        table.add_row(vec!["publishes".into(), topic, type_name]);
    }
    for (topic, type_name) in subscriptions {
        table.add_row(vec!["subscribes".into(), topic, type_name]);
    }
    print_table(table, "  No topics.");
    Ok(())
}

pub async fn kill(master_uri: &str, node: &str) -> anyhow::Result<()> {
    let (node, slave) = slave_client(master_uri, node).await?;
    if let Err(e) = slave.shutdown("shutdown requested by rosnet kill").await {
        bail!("node {node} refused to shut down: {e}");
    }
    println!("{} {node}", "Shutdown requested:".green());
    Ok(())
}
