//! Huntercoin full node binary.
//!
//! Opens the RocksDB-backed chain, serves the JSON-RPC surface, and shuts
//! down cleanly on Ctrl-C. Peer networking and the wallet live outside
//! this crate; blocks and signed transactions arrive through RPC.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};

use hunter_core::constants::Network;
use hunter_node_lib::{start_rpc_server, Node, NodeConfig};

/// Huntercoin full node — the blockchain that is also a game.
#[derive(Parser, Debug)]
#[command(name = "hunter-node", version, about)]
struct Args {
    /// Data directory for blockchain storage
    #[arg(long, default_value = ".huntercoin")]
    data_dir: PathBuf,

    /// JSON-RPC bind address
    #[arg(long, default_value = "127.0.0.1")]
    rpc_bind: String,

    /// JSON-RPC port (defaults to the network's standard port)
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Connect to the test network instead of mainnet
    #[arg(long)]
    testnet: bool,

    /// Keep game snapshots this many blocks below the tip; 0 keeps all
    #[arg(long, default_value_t = 100_000)]
    snapshot_depth: i32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&args.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let network = if args.testnet { Network::Testnet } else { Network::Mainnet };
    let mut config = NodeConfig::for_network(args.data_dir, network);
    config.rpc_bind = args.rpc_bind;
    if let Some(port) = args.rpc_port {
        config.rpc_port = port;
    }

    info!(?network, data_dir = %config.data_dir.display(), "starting node");

    let node = match Node::open(config.clone()) {
        Ok(node) => node,
        Err(e) => {
            error!("failed to open node: {e}");
            process::exit(1);
        }
    };

    if args.snapshot_depth > 0 {
        node.start_snapshot_pruner(args.snapshot_depth, 15 * 60);
    }

    let rpc_handle =
        match start_rpc_server(node.clone(), &config.rpc_bind, config.rpc_port).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("failed to start RPC server: {e}");
                process::exit(1);
            }
        };

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown requested");
    node.request_shutdown();
    rpc_handle.stop().ok();
    rpc_handle.stopped().await;
}
