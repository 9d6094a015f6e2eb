//! ringfs daemon: one ring node serving its slice of the DHT.
//!
//! Loads the configuration (generating a missing identity on first
//! run), starts the node, and serves until ctrl-c, at which point it
//! leaves the ring cleanly.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use ringfs::config::Config;
use ringfs::dht::NetServerDht;
use ringfs::local_store::LocalStore;
use ringfs::logging;
use ringfs::ring::{RingListener, RingNode, RingOptions};

#[derive(Debug, Parser)]
#[command(name = "ringfs", about = "Ring overlay node with DHT storage")]
struct Args {
    /// Configuration file (default: ~/.ringfs/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    ip: Option<String>,

    /// Override the listen port (0 picks an ephemeral port).
    #[arg(long)]
    port: Option<u16>,

    /// Override the node identifier (decimal).
    #[arg(long)]
    id: Option<u128>,

    /// Additional known peers, `ip:port`. May be repeated.
    #[arg(long = "known")]
    known: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging_safe();
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| Config::default_dir().join("config.toml"));
    let mut config = Config::load_or_default(Some(&config_path))
        .with_context(|| format!("loading {}", config_path.display()))?;
    if config.ensure_identity() {
        config
            .save(&config_path)
            .with_context(|| format!("saving {}", config_path.display()))?;
    }
    config.ring.known.extend(args.known.iter().cloned());

    let mut options = RingOptions::from_config(&config)?;
    if let Some(ip) = args.ip {
        options.ip = ip;
    }
    if let Some(port) = args.port {
        options.port = port;
    }
    if let Some(id) = args.id {
        options.id = Some(id);
    }

    let listener: Option<Arc<dyn RingListener>> = if config.ring.server {
        let store = LocalStore::open(&config.dht.datadir)
            .with_context(|| format!("opening store at {}", config.dht.datadir.display()))?;
        Some(Arc::new(NetServerDht::new(store)))
    } else {
        None
    };

    let node = RingNode::start(options, listener).await?;
    let (ip, port) = node.address();
    tracing::info!(target: "ringfs", "node {} serving at {}:{}", node.id(), ip, port);

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    node.leave().await?;
    Ok(())
}
