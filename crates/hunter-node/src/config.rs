//! Node configuration.
//!
//! A plain struct filled by the binary's CLI flags; there is no
//! configuration-file layer.

use std::path::PathBuf;

use hunter_core::constants::Network;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Directory holding the RocksDB database.
    pub data_dir: PathBuf,
    pub network: Network,
    /// JSON-RPC bind address.
    pub rpc_bind: String,
    pub rpc_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".huntercoin"),
            network: Network::Mainnet,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: Network::Mainnet.rpc_port(),
        }
    }
}

impl NodeConfig {
    /// Per-network defaults rooted at `data_dir`.
    pub fn for_network(data_dir: PathBuf, network: Network) -> Self {
        let data_dir = match network {
            Network::Mainnet => data_dir,
            Network::Testnet => data_dir.join("testnet"),
            Network::Regtest => data_dir.join("regtest"),
        };
        Self {
            data_dir,
            network,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: network.rpc_port(),
        }
    }
}
