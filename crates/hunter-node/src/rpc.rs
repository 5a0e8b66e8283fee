//! JSON-RPC server.
//!
//! Exposes the consensus-relevant surface: the game-state queries, the
//! name index, mempool maintenance, and the money-supply audit. Every
//! method returns a `warmup` error until the node finishes loading.
//! Wallet construction is out of scope, so `name_rawtx` accepts a fully
//! signed name transaction in wire hex and feeds it to the mempool.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use hunter_core::error::ChainError;
use hunter_core::names::NameEntry;
use hunter_core::ser;
use hunter_core::types::{Hash256, Transaction};

use crate::node::Node;

const WARMUP_CODE: i32 = -28;
const MISC_ERROR: i32 = -1;

fn rpc_err(e: impl std::fmt::Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(MISC_ERROR, e.to_string(), None::<()>)
}

fn map_chain_err(e: ChainError) -> ErrorObjectOwned {
    match e {
        ChainError::Warmup => {
            ErrorObjectOwned::owned(WARMUP_CODE, "node is warming up", None::<()>)
        }
        other => rpc_err(other),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// JSON rendering of a name-index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameInfoJson {
    pub name: String,
    pub value: String,
    pub height: i32,
    pub txid: String,
    pub dead: bool,
}

fn name_json(name: &[u8], entry: &NameEntry) -> NameInfoJson {
    NameInfoJson {
        name: String::from_utf8_lossy(name).into_owned(),
        value: String::from_utf8_lossy(&entry.value).into_owned(),
        height: entry.height,
        txid: entry.tx_pos.txid.to_string(),
        dead: entry.is_dead(),
    }
}

#[rpc(server)]
pub trait HunterRpc {
    /// The full game state, at the tip or a given height.
    #[method(name = "game_getstate")]
    async fn game_getstate(&self, height: Option<i32>) -> Result<Value, ErrorObjectOwned>;

    /// One player's state, at the tip or a given height.
    #[method(name = "game_getplayerstate")]
    async fn game_getplayerstate(
        &self,
        name: String,
        height: Option<i32>,
    ) -> Result<Value, ErrorObjectOwned>;

    /// Block until the best block changes from `last_hash`.
    #[method(name = "game_waitforchange")]
    async fn game_waitforchange(
        &self,
        last_hash: Option<String>,
    ) -> Result<Value, ErrorObjectOwned>;

    #[method(name = "name_show")]
    async fn name_show(&self, name: String) -> Result<NameInfoJson, ErrorObjectOwned>;

    #[method(name = "name_history")]
    async fn name_history(&self, name: String)
        -> Result<Vec<NameInfoJson>, ErrorObjectOwned>;

    #[method(name = "name_scan")]
    async fn name_scan(
        &self,
        start: Option<String>,
        max: Option<usize>,
    ) -> Result<Vec<NameInfoJson>, ErrorObjectOwned>;

    #[method(name = "name_filter")]
    async fn name_filter(
        &self,
        pattern: String,
        max: Option<usize>,
    ) -> Result<Vec<NameInfoJson>, ErrorObjectOwned>;

    /// Names with pending operations in the mempool.
    #[method(name = "name_pending")]
    async fn name_pending(&self) -> Result<Value, ErrorObjectOwned>;

    /// Alive names, i.e. a scan without dead entries.
    #[method(name = "name_list")]
    async fn name_list(&self) -> Result<Vec<NameInfoJson>, ErrorObjectOwned>;

    /// Submit a signed name transaction in wire hex.
    #[method(name = "name_rawtx")]
    async fn name_rawtx(&self, hex_tx: String) -> Result<String, ErrorObjectOwned>;

    #[method(name = "prune_gamedb")]
    async fn prune_gamedb(&self, depth: i32) -> Result<usize, ErrorObjectOwned>;

    #[method(name = "prune_nameindex")]
    async fn prune_nameindex(&self, depth: i32) -> Result<usize, ErrorObjectOwned>;

    /// Money-supply audit over the UTXO set and game world.
    #[method(name = "analyseutxo")]
    async fn analyseutxo(&self) -> Result<Value, ErrorObjectOwned>;

    /// Remove a transaction from the mempool.
    #[method(name = "deletetransaction")]
    async fn deletetransaction(&self, txid: String) -> Result<bool, ErrorObjectOwned>;

    #[method(name = "getblockcount")]
    async fn getblockcount(&self) -> Result<i32, ErrorObjectOwned>;

    #[method(name = "getblockhash")]
    async fn getblockhash(&self, height: i32) -> Result<String, ErrorObjectOwned>;

    #[method(name = "getblock")]
    async fn getblock(&self, hash: String) -> Result<Value, ErrorObjectOwned>;
}

pub struct RpcImpl {
    node: Arc<Node>,
}

#[async_trait]
impl HunterRpcServer for RpcImpl {
    async fn game_getstate(&self, height: Option<i32>) -> Result<Value, ErrorObjectOwned> {
        self.node.game_state_json(height).map_err(rpc_err_hunter)
    }

    async fn game_getplayerstate(
        &self,
        name: String,
        height: Option<i32>,
    ) -> Result<Value, ErrorObjectOwned> {
        self.node
            .player_state_json(&name, height)
            .map_err(rpc_err_hunter)?
            .ok_or_else(|| rpc_err(format!("no such player: {name}")))
    }

    async fn game_waitforchange(
        &self,
        last_hash: Option<String>,
    ) -> Result<Value, ErrorObjectOwned> {
        let last = match last_hash {
            Some(s) => Some(s.parse::<Hash256>().map_err(rpc_err)?),
            None => None,
        };
        let event = self.node.wait_for_change(last).await.map_err(map_chain_err)?;
        Ok(serde_json::json!({
            "height": event.height,
            "hash": event.hash.to_string(),
            "stateDigest": event.state_digest.to_string(),
        }))
    }

    async fn name_show(&self, name: String) -> Result<NameInfoJson, ErrorObjectOwned> {
        let entry = self
            .node
            .name_show(name.as_bytes())
            .map_err(map_chain_err)?
            .ok_or_else(|| rpc_err(format!("name not found: {name}")))?;
        Ok(name_json(name.as_bytes(), &entry))
    }

    async fn name_history(
        &self,
        name: String,
    ) -> Result<Vec<NameInfoJson>, ErrorObjectOwned> {
        let entries = self.node.name_history(name.as_bytes()).map_err(map_chain_err)?;
        Ok(entries.iter().map(|e| name_json(name.as_bytes(), e)).collect())
    }

    async fn name_scan(
        &self,
        start: Option<String>,
        max: Option<usize>,
    ) -> Result<Vec<NameInfoJson>, ErrorObjectOwned> {
        let start = start.unwrap_or_default();
        let max = max.unwrap_or(500);
        let entries = self
            .node
            .name_scan(start.as_bytes(), max)
            .map_err(map_chain_err)?;
        Ok(entries.iter().map(|(n, e)| name_json(n, e)).collect())
    }

    async fn name_filter(
        &self,
        pattern: String,
        max: Option<usize>,
    ) -> Result<Vec<NameInfoJson>, ErrorObjectOwned> {
        let entries = self
            .node
            .name_filter(&pattern, max.unwrap_or(500))
            .map_err(map_chain_err)?;
        Ok(entries.iter().map(|(n, e)| name_json(n, e)).collect())
    }

    async fn name_pending(&self) -> Result<Value, ErrorObjectOwned> {
        let pending = self.node.name_pending();
        let obj: serde_json::Map<String, Value> = pending
            .into_iter()
            .map(|(name, txids)| {
                (
                    String::from_utf8_lossy(&name).into_owned(),
                    Value::Array(
                        txids.into_iter().map(|t| Value::String(t.to_string())).collect(),
                    ),
                )
            })
            .collect();
        Ok(Value::Object(obj))
    }

    async fn name_list(&self) -> Result<Vec<NameInfoJson>, ErrorObjectOwned> {
        let entries = self.node.name_scan(b"", usize::MAX).map_err(map_chain_err)?;
        Ok(entries
            .iter()
            .filter(|(_, e)| !e.is_dead())
            .map(|(n, e)| name_json(n, e))
            .collect())
    }

    async fn name_rawtx(&self, hex_tx: String) -> Result<String, ErrorObjectOwned> {
        let bytes = hex::decode(hex_tx).map_err(rpc_err)?;
        let tx: Transaction = ser::deserialize(&bytes).map_err(rpc_err)?;
        let txid = self
            .node
            .submit_transaction(tx, now_secs())
            .map_err(rpc_err_hunter)?;
        Ok(txid.to_string())
    }

    async fn prune_gamedb(&self, depth: i32) -> Result<usize, ErrorObjectOwned> {
        self.node.prune_game_states(depth).map_err(rpc_err_hunter)
    }

    async fn prune_nameindex(&self, depth: i32) -> Result<usize, ErrorObjectOwned> {
        self.node.prune_name_index(depth).map_err(rpc_err_hunter)
    }

    async fn analyseutxo(&self) -> Result<Value, ErrorObjectOwned> {
        let analysis = self.node.analyse_utxo().map_err(rpc_err_hunter)?;
        Ok(serde_json::json!({
            "utxo": {
                "count": analysis.utxo.count,
                "total": analysis.utxo.total_amount,
                "inNames": analysis.utxo.in_names_amount,
            },
            "lootOnMap": analysis.loot_on_map,
            "lootCarried": analysis.loot_carried,
            "gameFund": analysis.game_fund,
            "liveNameLocked": analysis.live_name_locked,
            "total": analysis.actual,
            "expected": analysis.expected,
            "check": analysis.balances(),
        }))
    }

    async fn deletetransaction(&self, txid: String) -> Result<bool, ErrorObjectOwned> {
        let txid: Hash256 = txid.parse().map_err(rpc_err)?;
        Ok(self.node.delete_transaction(&txid))
    }

    async fn getblockcount(&self) -> Result<i32, ErrorObjectOwned> {
        Ok(self.node.best_tip().map_err(map_chain_err)?.0)
    }

    async fn getblockhash(&self, height: i32) -> Result<String, ErrorObjectOwned> {
        self.node
            .block_hash_at(height)
            .map_err(map_chain_err)?
            .map(|h| h.to_string())
            .ok_or_else(|| rpc_err(format!("no block at height {height}")))
    }

    async fn getblock(&self, hash: String) -> Result<Value, ErrorObjectOwned> {
        let hash: Hash256 = hash.parse().map_err(rpc_err)?;
        let block = self
            .node
            .block_by_hash(&hash)
            .map_err(map_chain_err)?
            .ok_or_else(|| rpc_err("block not found"))?;
        Ok(serde_json::json!({
            "hash": block.hash().to_string(),
            "version": block.header.version,
            "previousblockhash": block.header.prev_hash.to_string(),
            "merkleroot": block.header.tx_merkle_root.to_string(),
            "gamemerkleroot": block.header.game_merkle_root.to_string(),
            "time": block.header.time,
            "bits": format!("{:08x}", block.header.bits),
            "nonce": block.header.nonce,
            "tx": block.vtx.iter().map(|t| t.txid().to_string()).collect::<Vec<_>>(),
            "gametx": block.vgametx.iter().map(|t| t.txid().to_string()).collect::<Vec<_>>(),
        }))
    }
}

fn rpc_err_hunter(e: hunter_core::error::HunterError) -> ErrorObjectOwned {
    match e {
        hunter_core::error::HunterError::Chain(ChainError::Warmup) => {
            ErrorObjectOwned::owned(WARMUP_CODE, "node is warming up", None::<()>)
        }
        other => rpc_err(other),
    }
}

/// Start the JSON-RPC server and return its handle.
pub async fn start_rpc_server(
    node: Arc<Node>,
    bind: &str,
    port: u16,
) -> Result<ServerHandle, Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{bind}:{port}");
    let server = Server::builder().build(addr.as_str()).await?;
    let local = server.local_addr()?;
    let handle = server.start(RpcImpl { node }.into_rpc());
    info!(%local, "JSON-RPC server listening");
    Ok(handle)
}
