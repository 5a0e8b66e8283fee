//! # hunter-node-lib
//! Node composition: RocksDB-backed chain storage, the chain and mempool
//! tasks, tip-change notifications, and the JSON-RPC surface.

pub mod config;
pub mod node;
pub mod rpc;
pub mod storage;

pub use config::NodeConfig;
pub use node::{Node, TipEvent};
pub use rpc::start_rpc_server;
pub use storage::RocksStorage;
