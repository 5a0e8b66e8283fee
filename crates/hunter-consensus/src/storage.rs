//! The transactional storage facade behind the block processor.
//!
//! One trait fronts the five logical stores (blocks, tx index, UTXO set,
//! name index, game snapshots) plus chain metadata. `begin`/`commit`/
//! `abort` bracket each block connect or disconnect — and one whole reorg
//! — so a failure rolls back every component together. The in-memory
//! implementation here backs the tests; the node provides RocksDB.

use std::collections::HashMap;

use hunter_core::error::ChainError;
use hunter_core::names::{MemoryNameIndex, NameEntry, NameIndex};
use hunter_core::types::{Block, Hash256, OutPoint, Transaction, TxPos, UtxoEntry};
use hunter_core::utxo::{MemoryUtxoStore, UtxoStore, UtxoSummary};

use hunter_game::state::GameState;

/// Everything the consensus engine persists, behind one transaction.
pub trait ChainStorage {
    /// Open a write transaction. Transactions do not nest.
    fn begin(&mut self);
    /// Atomically apply all writes since `begin`.
    fn commit(&mut self) -> Result<(), ChainError>;
    /// Discard all writes since `begin`.
    fn abort(&mut self);

    // --- UTXO set ---

    fn read_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ChainError>;
    fn insert_utxo(&mut self, outpoint: OutPoint, entry: UtxoEntry) -> Result<(), ChainError>;
    fn remove_utxo(&mut self, outpoint: &OutPoint) -> Result<(), ChainError>;
    fn utxo_summary(&self) -> Result<UtxoSummary, ChainError>;
    /// Wipe the whole set (prelude to a rescan).
    fn clear_utxos(&mut self) -> Result<(), ChainError>;

    /// Insert all spendable outputs of a confirmed transaction.
    fn insert_tx_outputs(&mut self, tx: &Transaction, height: i32) -> Result<(), ChainError> {
        let txid = tx.txid();
        for (n, txo) in tx.vout.iter().enumerate() {
            if txo.script_pubkey.is_provably_unspendable() {
                continue;
            }
            self.insert_utxo(
                OutPoint::new(txid, n as u32),
                UtxoEntry {
                    txo: txo.clone(),
                    height,
                    is_coinbase: tx.is_coinbase(),
                    is_game_tx: tx.is_game_tx(),
                },
            )?;
        }
        Ok(())
    }

    /// Remove whatever outputs of `tx` are still unspent.
    fn remove_tx_outputs(&mut self, tx: &Transaction) -> Result<(), ChainError> {
        let txid = tx.txid();
        for n in 0..tx.vout.len() {
            let outpoint = OutPoint::new(txid, n as u32);
            if self.read_utxo(&outpoint)?.is_some() {
                self.remove_utxo(&outpoint)?;
            }
        }
        Ok(())
    }

    // --- Name index ---

    fn name_push(&mut self, name: &[u8], entry: NameEntry) -> Result<(), ChainError>;
    fn name_pop(&mut self, name: &[u8], height: i32) -> Result<(), ChainError>;
    fn name_read(&self, name: &[u8]) -> Result<Option<NameEntry>, ChainError>;
    fn name_history(&self, name: &[u8]) -> Result<Vec<NameEntry>, ChainError>;
    fn name_scan(&self, start: &[u8], max: usize)
        -> Result<Vec<(Vec<u8>, NameEntry)>, ChainError>;
    fn name_prune(&mut self, before_height: i32) -> Result<usize, ChainError>;

    fn name_available(&self, name: &[u8]) -> Result<bool, ChainError> {
        Ok(match self.name_read(name)? {
            None => true,
            Some(entry) => entry.is_dead(),
        })
    }

    // --- Blocks and tx index ---

    fn write_block(&mut self, block: &Block) -> Result<(), ChainError>;
    fn read_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError>;
    /// Every stored block, for rebuilding the in-memory index at startup.
    fn all_blocks(&self) -> Result<Vec<Block>, ChainError>;

    fn write_tx_index(&mut self, txid: &Hash256, pos: TxPos) -> Result<(), ChainError>;
    fn erase_tx_index(&mut self, txid: &Hash256) -> Result<(), ChainError>;
    fn read_tx_index(&self, txid: &Hash256) -> Result<Option<TxPos>, ChainError>;

    /// Fetch a confirmed transaction through the tx index.
    fn read_tx(&self, txid: &Hash256) -> Result<Option<(Transaction, TxPos)>, ChainError> {
        let Some(pos) = self.read_tx_index(txid)? else {
            return Ok(None);
        };
        let Some(block) = self.read_block(&pos.block_hash)? else {
            return Err(ChainError::BlockNotFound(pos.block_hash.to_string()));
        };
        let tx = block
            .vtx
            .iter()
            .chain(block.vgametx.iter())
            .find(|tx| tx.txid() == *txid)
            .cloned()
            .ok_or_else(|| ChainError::TxNotFound(txid.to_string()))?;
        Ok(Some((tx, pos)))
    }

    // --- Game snapshots ---

    fn write_game_state(&mut self, height: i32, state: &GameState) -> Result<(), ChainError>;
    fn read_game_state(&self, height: i32) -> Result<Option<GameState>, ChainError>;
    fn erase_game_state(&mut self, height: i32) -> Result<(), ChainError>;
    /// Heights of all stored snapshots, ascending.
    fn game_state_heights(&self) -> Result<Vec<i32>, ChainError>;

    /// The deepest snapshot at or below `height`, the replay anchor.
    fn latest_game_state_at_or_below(
        &self,
        height: i32,
    ) -> Result<Option<(i32, GameState)>, ChainError> {
        let anchor = self
            .game_state_heights()?
            .into_iter()
            .filter(|h| *h <= height)
            .next_back();
        match anchor {
            None => Ok(None),
            Some(h) => Ok(self.read_game_state(h)?.map(|s| (h, s))),
        }
    }

    // --- Metadata ---

    fn best_hash(&self) -> Result<Option<Hash256>, ChainError>;
    fn set_best_hash(&mut self, hash: &Hash256) -> Result<(), ChainError>;
}

/// In-memory implementation. Transactions are full-state snapshots, which
/// is plenty for tests and keeps abort semantics exact.
#[derive(Default)]
pub struct MemoryChainStorage {
    utxos: MemoryUtxoStore,
    names: MemoryNameIndex,
    blocks: HashMap<Hash256, Block>,
    tx_index: HashMap<Hash256, TxPos>,
    game_states: HashMap<i32, GameState>,
    best: Option<Hash256>,
    checkpoint: Option<Box<MemoryChainStorage>>,
}

impl MemoryChainStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn clone_data(&self) -> MemoryChainStorage {
        MemoryChainStorage {
            utxos: self.utxos.clone(),
            names: self.names.clone(),
            blocks: self.blocks.clone(),
            tx_index: self.tx_index.clone(),
            game_states: self.game_states.clone(),
            best: self.best,
            checkpoint: None,
        }
    }
}

impl ChainStorage for MemoryChainStorage {
    fn begin(&mut self) {
        debug_assert!(self.checkpoint.is_none(), "transactions do not nest");
        self.checkpoint = Some(Box::new(self.clone_data()));
    }

    fn commit(&mut self) -> Result<(), ChainError> {
        self.checkpoint = None;
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(saved) = self.checkpoint.take() {
            *self = *saved;
        }
    }

    fn read_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ChainError> {
        self.utxos.read_utxo(outpoint)
    }

    fn insert_utxo(&mut self, outpoint: OutPoint, entry: UtxoEntry) -> Result<(), ChainError> {
        self.utxos.insert_utxo(outpoint, entry)
    }

    fn remove_utxo(&mut self, outpoint: &OutPoint) -> Result<(), ChainError> {
        self.utxos.remove_utxo(outpoint)
    }

    fn utxo_summary(&self) -> Result<UtxoSummary, ChainError> {
        self.utxos.analyse()
    }

    fn clear_utxos(&mut self) -> Result<(), ChainError> {
        self.utxos = MemoryUtxoStore::new();
        Ok(())
    }

    fn name_push(&mut self, name: &[u8], entry: NameEntry) -> Result<(), ChainError> {
        self.names.push_entry(name, entry)
    }

    fn name_pop(&mut self, name: &[u8], height: i32) -> Result<(), ChainError> {
        self.names.pop_entry(name, height)
    }

    fn name_read(&self, name: &[u8]) -> Result<Option<NameEntry>, ChainError> {
        self.names.read_name(name)
    }

    fn name_history(&self, name: &[u8]) -> Result<Vec<NameEntry>, ChainError> {
        self.names.history(name)
    }

    fn name_scan(
        &self,
        start: &[u8],
        max: usize,
    ) -> Result<Vec<(Vec<u8>, NameEntry)>, ChainError> {
        self.names.scan_names(start, max)
    }

    fn name_prune(&mut self, before_height: i32) -> Result<usize, ChainError> {
        self.names.prune(before_height)
    }

    fn write_block(&mut self, block: &Block) -> Result<(), ChainError> {
        self.blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    fn read_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn all_blocks(&self) -> Result<Vec<Block>, ChainError> {
        Ok(self.blocks.values().cloned().collect())
    }

    fn write_tx_index(&mut self, txid: &Hash256, pos: TxPos) -> Result<(), ChainError> {
        self.tx_index.insert(*txid, pos);
        Ok(())
    }

    fn erase_tx_index(&mut self, txid: &Hash256) -> Result<(), ChainError> {
        self.tx_index.remove(txid);
        Ok(())
    }

    fn read_tx_index(&self, txid: &Hash256) -> Result<Option<TxPos>, ChainError> {
        Ok(self.tx_index.get(txid).copied())
    }

    fn write_game_state(&mut self, height: i32, state: &GameState) -> Result<(), ChainError> {
        self.game_states.insert(height, state.clone());
        Ok(())
    }

    fn read_game_state(&self, height: i32) -> Result<Option<GameState>, ChainError> {
        Ok(self.game_states.get(&height).cloned())
    }

    fn erase_game_state(&mut self, height: i32) -> Result<(), ChainError> {
        self.game_states.remove(&height);
        Ok(())
    }

    fn game_state_heights(&self) -> Result<Vec<i32>, ChainError> {
        let mut heights: Vec<i32> = self.game_states.keys().copied().collect();
        heights.sort_unstable();
        Ok(heights)
    }

    fn best_hash(&self) -> Result<Option<Hash256>, ChainError> {
        Ok(self.best)
    }

    fn set_best_hash(&mut self, hash: &Hash256) -> Result<(), ChainError> {
        self.best = Some(*hash);
        Ok(())
    }
}
