//! Node composition.
//!
//! The [`Node`] owns the chain context behind a single writer lock (the
//! chain task), the mempool behind its own lock (the mempool task), and a
//! broadcast channel announcing every new tip for `game_waitforchange`.
//! RPC handlers take read leases; block submission is the only writer.
//! Long operations (name rescan, snapshot pruning) poll the shutdown flag
//! at block granularity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{info, warn};

use hunter_core::constants::KEEP_EVERY_NTH_STATE;
use hunter_core::error::{ChainError, HunterError, MempoolError};
use hunter_core::hashing::sha256d;
use hunter_core::mempool::{AcceptContext, Mempool};
use hunter_core::names::NameEntry;
use hunter_core::script::decode_name_script;
use hunter_core::types::{Block, Hash256, Transaction, TxPos};

use hunter_consensus::engine::{AcceptOutcome, ChainContext, SupplyAnalysis};
use hunter_consensus::gametx::is_player_death_input;
use hunter_consensus::storage::ChainStorage;

use hunter_game::state::GameState;

use crate::config::NodeConfig;
use crate::storage::RocksStorage;

/// Announcement of a new best tip.
#[derive(Clone, Debug)]
pub struct TipEvent {
    pub height: i32,
    pub hash: Hash256,
    /// Digest of the game state, so waiters can detect replays.
    pub state_digest: Hash256,
}

pub struct Node {
    config: NodeConfig,
    chain: RwLock<ChainContext<RocksStorage>>,
    mempool: Mutex<Mempool>,
    tip_tx: broadcast::Sender<TipEvent>,
    shutdown: AtomicBool,
    warmed_up: AtomicBool,
}

impl Node {
    /// Open the database, load or bootstrap the chain, and rebuild the
    /// name index if it is missing.
    pub fn open(config: NodeConfig) -> Result<Arc<Self>, HunterError> {
        let storage = RocksStorage::open(config.data_dir.join("chain"))
            .map_err(HunterError::Chain)?;
        let chain = ChainContext::new(storage, config.network)?;
        let (tip_tx, _) = broadcast::channel(64);

        let node = Arc::new(Self {
            mempool: Mutex::new(Mempool::new(config.network)),
            config,
            chain: RwLock::new(chain),
            tip_tx,
            shutdown: AtomicBool::new(false),
            warmed_up: AtomicBool::new(false),
        });

        node.rescan_names_if_missing()?;
        node.warmed_up.store(true, Ordering::SeqCst);
        Ok(node)
    }

    pub fn network(&self) -> hunter_core::constants::Network {
        self.config.network
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn check_warmup(&self) -> Result<(), ChainError> {
        if self.warmed_up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChainError::Warmup)
        }
    }

    /// The chain task: feed a validated-on-the-wire block through the
    /// processor and keep the mempool consistent with the new tip.
    pub fn submit_block(&self, block: Block, now: u32) -> Result<AcceptOutcome, HunterError> {
        self.check_warmup().map_err(HunterError::Chain)?;
        let mut chain = self.chain.write();
        let outcome = chain.accept_block(block.clone(), now)?;

        match &outcome {
            AcceptOutcome::Connected { height, hash } => {
                let mut mempool = self.mempool.lock();
                mempool.remove_for_block(&block);
                drop(mempool);
                self.announce_tip(&chain, *height, *hash);
            }
            AcceptOutcome::Reorganized(summary) => {
                {
                    let mut mempool = self.mempool.lock();
                    // Evict everything confirmed by the new branch, then
                    // offer the abandoned branch's transactions back.
                    mempool.remove_for_block(&block);
                    let resurrect = summary.resurrected.clone();
                    drop(mempool);
                    for tx in resurrect {
                        let _ = self.accept_into_mempool(&chain, tx, now as u64);
                    }
                }
                let height = chain.best_height();
                self.announce_tip(&chain, height, summary.tip);
            }
            AcceptOutcome::SideChain | AcceptOutcome::AlreadyKnown => {}
        }
        Ok(outcome)
    }

    fn announce_tip(
        &self,
        chain: &ChainContext<RocksStorage>,
        height: i32,
        hash: Hash256,
    ) {
        let digest = state_digest(chain.current_game_state());
        let _ = self.tip_tx.send(TipEvent { height, hash, state_digest: digest });
    }

    /// The mempool task: transaction ingress.
    pub fn submit_transaction(&self, tx: Transaction, now: u64) -> Result<Hash256, HunterError> {
        self.check_warmup().map_err(HunterError::Chain)?;
        let chain = self.chain.read();
        self.accept_into_mempool(&chain, tx, now)
            .map_err(HunterError::Mempool)
    }

    fn accept_into_mempool(
        &self,
        chain: &ChainContext<RocksStorage>,
        tx: Transaction,
        now: u64,
    ) -> Result<Hash256, MempoolError> {
        let height = chain.best_height() + 1;
        let get_utxo = |op: &hunter_core::types::OutPoint| {
            chain.storage.read_utxo(op).ok().flatten()
        };
        let check_move =
            |tx: &Transaction| chain.check_mempool_move(tx);
        let ctx = AcceptContext {
            height,
            now,
            get_utxo: &get_utxo,
            check_move: &check_move,
        };
        self.mempool.lock().accept(tx, &ctx)
    }

    /// Subscribe to tip announcements (`game_waitforchange`).
    pub fn subscribe_tip(&self) -> broadcast::Receiver<TipEvent> {
        self.tip_tx.subscribe()
    }

    /// Wait until the tip differs from `last_hash` (or the next change if
    /// `None`), honouring shutdown.
    pub async fn wait_for_change(&self, last_hash: Option<Hash256>) -> Result<TipEvent, ChainError> {
        self.check_warmup()?;
        {
            let chain = self.chain.read();
            let current = chain.best_hash();
            if let (Some(last), Some(current)) = (last_hash, current) {
                if last != current {
                    let height = chain.best_height();
                    return Ok(TipEvent {
                        height,
                        hash: current,
                        state_digest: state_digest(chain.current_game_state()),
                    });
                }
            }
        }
        let mut rx = self.subscribe_tip();
        loop {
            if self.is_shutting_down() {
                return Err(ChainError::Shutdown);
            }
            match rx.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ChainError::Shutdown);
                }
            }
        }
    }

    // --- Read surface (RPC) ---

    pub fn best_tip(&self) -> Result<(i32, Option<Hash256>), ChainError> {
        self.check_warmup()?;
        let chain = self.chain.read();
        Ok((chain.best_height(), chain.best_hash()))
    }

    pub fn block_hash_at(&self, height: i32) -> Result<Option<Hash256>, ChainError> {
        self.check_warmup()?;
        let chain = self.chain.read();
        Ok(chain
            .index
            .find_by_height(height)
            .map(|id| chain.index.get(id).hash))
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        self.check_warmup()?;
        self.chain.read().storage.read_block(hash)
    }

    pub fn game_state_json(&self, height: Option<i32>) -> Result<serde_json::Value, HunterError> {
        self.check_warmup().map_err(HunterError::Chain)?;
        let chain = self.chain.read();
        let state = self.state_at(&chain, height)?;
        Ok(state.to_json())
    }

    pub fn player_state_json(
        &self,
        name: &str,
        height: Option<i32>,
    ) -> Result<Option<serde_json::Value>, HunterError> {
        self.check_warmup().map_err(HunterError::Chain)?;
        let chain = self.chain.read();
        let state = self.state_at(&chain, height)?;
        Ok(state.to_json().get("players").and_then(|p| p.get(name)).cloned())
    }

    fn state_at(
        &self,
        chain: &ChainContext<RocksStorage>,
        height: Option<i32>,
    ) -> Result<GameState, HunterError> {
        match height {
            None => Ok(chain.current_game_state().clone()),
            Some(h) => chain.game_state_at(h),
        }
    }

    pub fn name_show(&self, name: &[u8]) -> Result<Option<NameEntry>, ChainError> {
        self.check_warmup()?;
        self.chain.read().storage.name_read(name)
    }

    pub fn name_history(&self, name: &[u8]) -> Result<Vec<NameEntry>, ChainError> {
        self.check_warmup()?;
        self.chain.read().storage.name_history(name)
    }

    pub fn name_scan(
        &self,
        start: &[u8],
        max: usize,
    ) -> Result<Vec<(Vec<u8>, NameEntry)>, ChainError> {
        self.check_warmup()?;
        self.chain.read().storage.name_scan(start, max)
    }

    /// Names whose latest value contains `pattern` (a substring match,
    /// which is what the original's regex filter was used for).
    pub fn name_filter(
        &self,
        pattern: &str,
        max: usize,
    ) -> Result<Vec<(Vec<u8>, NameEntry)>, ChainError> {
        self.check_warmup()?;
        let all = self.chain.read().storage.name_scan(b"", usize::MAX)?;
        Ok(all
            .into_iter()
            .filter(|(name, entry)| {
                String::from_utf8_lossy(name).contains(pattern)
                    || String::from_utf8_lossy(&entry.value).contains(pattern)
            })
            .take(max)
            .collect())
    }

    pub fn name_pending(&self) -> Vec<(Vec<u8>, Vec<Hash256>)> {
        self.mempool.lock().pending_names()
    }

    pub fn mempool_size(&self) -> usize {
        self.mempool.lock().len()
    }

    /// Drop a transaction from the mempool (`deletetransaction`).
    pub fn delete_transaction(&self, txid: &Hash256) -> bool {
        self.mempool.lock().remove(txid).is_some()
    }

    pub fn analyse_utxo(&self) -> Result<SupplyAnalysis, HunterError> {
        self.check_warmup().map_err(HunterError::Chain)?;
        self.chain.read().analyse_supply()
    }

    /// Drop game snapshots deeper than `depth` below the tip, keeping the
    /// periodic anchors' genesis snapshot.
    pub fn prune_game_states(&self, depth: i32) -> Result<usize, HunterError> {
        self.check_warmup().map_err(HunterError::Chain)?;
        let mut chain = self.chain.write();
        let tip = chain.best_height();
        let cutoff = tip - depth;
        let heights = chain
            .storage
            .game_state_heights()
            .map_err(HunterError::Chain)?;
        let mut pruned = 0;
        for h in heights {
            if self.is_shutting_down() {
                break;
            }
            // Keep genesis and everything within the requested depth.
            if h == 0 || h >= cutoff {
                continue;
            }
            // Keep the replay anchor for the cutoff itself.
            if h == (cutoff / KEEP_EVERY_NTH_STATE) * KEEP_EVERY_NTH_STATE {
                continue;
            }
            chain
                .storage
                .erase_game_state(h)
                .map_err(HunterError::Chain)?;
            pruned += 1;
        }
        Ok(pruned)
    }

    pub fn prune_name_index(&self, depth: i32) -> Result<usize, HunterError> {
        self.check_warmup().map_err(HunterError::Chain)?;
        let mut chain = self.chain.write();
        let cutoff = chain.best_height() - depth;
        chain.storage.name_prune(cutoff).map_err(HunterError::Chain)
    }

    /// Build a candidate block over the current tip from mempool
    /// transactions, for an external miner.
    pub fn create_block_template(
        &self,
        miner_dest: &[u8; 20],
        time: u32,
    ) -> Result<Block, HunterError> {
        self.check_warmup().map_err(HunterError::Chain)?;
        let candidates: Vec<Transaction> = {
            let mempool = self.mempool.lock();
            mempool.candidates().into_iter().map(|e| e.tx).collect()
        };
        self.chain
            .write()
            .create_block_template(&candidates, miner_dest, time)
    }

    /// Rebuild the UTXO set from scratch by replaying every best-chain
    /// block: spend inputs, credit outputs. Scripts are not re-verified;
    /// the chain was validated when it connected.
    pub fn rescan_utxos(&self) -> Result<(), HunterError> {
        let mut chain = self.chain.write();
        let tip = chain.best_height();
        info!(tip, "rebuilding UTXO set from the chain");

        chain.storage.begin();
        let result = (|| -> Result<(), HunterError> {
            chain.storage.clear_utxos().map_err(HunterError::Chain)?;
            for height in 0..=tip {
                if self.is_shutting_down() {
                    return Err(HunterError::Chain(ChainError::Shutdown));
                }
                let Some(id) = chain.index.find_by_height(height) else {
                    return Err(HunterError::Chain(ChainError::GameStateMissing(height)));
                };
                let hash = chain.index.get(id).hash;
                let block = chain
                    .storage
                    .read_block(&hash)
                    .map_err(HunterError::Chain)?
                    .ok_or_else(|| ChainError::BlockNotFound(hash.to_string()))
                    .map_err(HunterError::Chain)?;
                for tx in block.vtx.iter().chain(block.vgametx.iter()) {
                    if !tx.is_coinbase() {
                        for input in &tx.vin {
                            if input.prevout.is_null() {
                                continue;
                            }
                            if chain
                                .storage
                                .read_utxo(&input.prevout)
                                .map_err(HunterError::Chain)?
                                .is_some()
                            {
                                chain
                                    .storage
                                    .remove_utxo(&input.prevout)
                                    .map_err(HunterError::Chain)?;
                            }
                        }
                    }
                    chain
                        .storage
                        .insert_tx_outputs(tx, height)
                        .map_err(HunterError::Chain)?;
                }
            }
            Ok(())
        })();
        match result {
            Ok(()) => chain.storage.commit().map_err(HunterError::Chain),
            Err(e) => {
                chain.storage.abort();
                Err(e)
            }
        }
    }

    /// Background snapshot task: periodically drop game snapshots deeper
    /// than `depth` below the tip. Exits when shutdown is requested.
    pub fn start_snapshot_pruner(self: &Arc<Self>, depth: i32, every_secs: u64) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(every_secs));
            loop {
                interval.tick().await;
                if node.is_shutting_down() {
                    break;
                }
                match node.prune_game_states(depth) {
                    Ok(0) => {}
                    Ok(pruned) => info!(pruned, "pruned game snapshots"),
                    Err(e) => warn!("snapshot prune failed: {e}"),
                }
            }
        });
    }

    /// Rebuild the name index by replaying the chain when the index is
    /// empty but blocks exist (first run after an upgrade, or a wipe).
    fn rescan_names_if_missing(&self) -> Result<(), HunterError> {
        let mut chain = self.chain.write();
        let tip = chain.best_height();
        if tip <= 0 || !chain.storage.names_empty().map_err(HunterError::Chain)? {
            return Ok(());
        }
        info!(tip, "name index missing; rescanning chain");

        chain.storage.begin();
        let result = self.rescan_names_inner(&mut chain, tip);
        match result {
            Ok(()) => chain.storage.commit().map_err(HunterError::Chain),
            Err(e) => {
                chain.storage.abort();
                warn!("name rescan aborted: {e}");
                Err(e)
            }
        }
    }

    fn rescan_names_inner(
        &self,
        chain: &mut ChainContext<RocksStorage>,
        tip: i32,
    ) -> Result<(), HunterError> {
        for height in 0..=tip {
            if self.is_shutting_down() {
                return Err(HunterError::Chain(ChainError::Shutdown));
            }
            let Some(id) = chain.index.find_by_height(height) else {
                return Err(HunterError::Chain(ChainError::GameStateMissing(height)));
            };
            let hash = chain.index.get(id).hash;
            let block = chain
                .storage
                .read_block(&hash)
                .map_err(HunterError::Chain)?
                .ok_or_else(|| ChainError::BlockNotFound(hash.to_string()))
                .map_err(HunterError::Chain)?;

            for (i, tx) in block.vtx.iter().enumerate() {
                if !tx.is_name_tx() {
                    continue;
                }
                for out in &tx.vout {
                    let Some(ns) = decode_name_script(&out.script_pubkey) else {
                        continue;
                    };
                    let (Some(name), Some(value)) = (ns.name(), ns.value()) else {
                        continue;
                    };
                    chain
                        .storage
                        .name_push(
                            name,
                            NameEntry {
                                height,
                                value: value.to_vec(),
                                tx_pos: TxPos {
                                    txid: tx.txid(),
                                    block_hash: hash,
                                    tx_index: i as u32,
                                },
                            },
                        )
                        .map_err(HunterError::Chain)?;
                }
            }
            for (i, tx) in block.vgametx.iter().enumerate() {
                for input in &tx.vin {
                    let Some(name) = is_player_death_input(input) else { continue };
                    chain
                        .storage
                        .name_push(
                            &name,
                            NameEntry {
                                height,
                                value: hunter_core::constants::VALUE_DEAD.to_vec(),
                                tx_pos: TxPos {
                                    txid: tx.txid(),
                                    block_hash: hash,
                                    tx_index: (block.vtx.len() + i) as u32,
                                },
                            },
                        )
                        .map_err(HunterError::Chain)?;
                }
            }
        }
        Ok(())
    }
}

fn state_digest(state: &GameState) -> Hash256 {
    let bytes = bincode::encode_to_vec(state, bincode::config::standard())
        .unwrap_or_default();
    sha256d(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node() -> (Arc<Node>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            network: hunter_core::constants::Network::Mainnet,
            ..NodeConfig::default()
        };
        (Node::open(config).unwrap(), dir)
    }

    #[test]
    fn node_bootstraps_genesis() {
        let (node, _dir) = test_node();
        let (height, hash) = node.best_tip().unwrap();
        assert_eq!(height, 0);
        assert_eq!(
            hash.unwrap(),
            hunter_core::genesis::genesis_hash(hunter_core::constants::Network::Mainnet),
        );
    }

    #[test]
    fn genesis_game_state_has_treasure() {
        let (node, _dir) = test_node();
        let state = node.game_state_json(None).unwrap();
        assert_eq!(state["height"], 0);
        // The genesis step scatters nine coins over the harvest areas.
        let total: i64 = state["loot"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["amount"].as_i64().unwrap())
            .sum();
        assert_eq!(total, 9 * hunter_core::constants::COIN);
    }

    #[test]
    fn reopen_restores_tip() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            network: hunter_core::constants::Network::Mainnet,
            ..NodeConfig::default()
        };
        let hash1 = {
            let node = Node::open(config.clone()).unwrap();
            node.best_tip().unwrap().1
        };
        let node = Node::open(config).unwrap();
        assert_eq!(node.best_tip().unwrap().1, hash1);
    }

    #[test]
    fn supply_balances_at_genesis() {
        let (node, _dir) = test_node();
        let analysis = node.analyse_utxo().unwrap();
        assert!(analysis.balances());
        assert_eq!(analysis.actual, analysis.expected);
    }

    #[test]
    fn unknown_player_state_is_none() {
        let (node, _dir) = test_node();
        assert!(node.player_state_json("nobody", None).unwrap().is_none());
    }

    #[tokio::test]
    async fn wait_for_change_returns_immediately_on_stale_hash() {
        let (node, _dir) = test_node();
        let event = node.wait_for_change(Some(Hash256([9; 32]))).await.unwrap();
        assert_eq!(event.height, 0);
    }
}
