//! The unspent transaction output set.
//!
//! [`UtxoStore`] is the storage interface for the authoritative UTXO set;
//! [`MemoryUtxoStore`] backs tests and the miner's test pool, and the node
//! provides a RocksDB implementation. Provably unspendable outputs are
//! never inserted, which keeps the `analyseutxo` money-supply sweep exact.

use std::collections::HashMap;

use crate::error::ChainError;
use crate::script::{classify, ScriptType};
use crate::types::{OutPoint, Transaction, UtxoEntry};

/// Aggregate of an O(n) sweep over the set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UtxoSummary {
    pub count: u64,
    pub total_amount: i64,
    /// Portion of `total_amount` locked in name outputs.
    pub in_names_amount: i64,
}

/// Mutable interface to the UTXO set.
pub trait UtxoStore {
    fn read_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ChainError>;

    /// Insert one output of a confirmed transaction. Fails if present.
    fn insert_utxo(&mut self, outpoint: OutPoint, entry: UtxoEntry) -> Result<(), ChainError>;

    /// Remove a spent output. Fails if absent.
    fn remove_utxo(&mut self, outpoint: &OutPoint) -> Result<(), ChainError>;

    fn contains_utxo(&self, outpoint: &OutPoint) -> Result<bool, ChainError> {
        Ok(self.read_utxo(outpoint)?.is_some())
    }

    /// Insert all spendable outputs of a transaction.
    fn insert_tx_outputs(&mut self, tx: &Transaction, height: i32) -> Result<usize, ChainError> {
        let txid = tx.txid();
        let is_coinbase = tx.is_coinbase();
        let is_game_tx = tx.is_game_tx();
        let mut inserted = 0;
        for (n, txo) in tx.vout.iter().enumerate() {
            if txo.script_pubkey.is_provably_unspendable() {
                continue;
            }
            self.insert_utxo(
                OutPoint::new(txid, n as u32),
                UtxoEntry { txo: txo.clone(), height, is_coinbase, is_game_tx },
            )?;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Remove whatever outputs of `tx` are still unspent (block disconnect).
    fn remove_tx_outputs(&mut self, tx: &Transaction) -> Result<usize, ChainError> {
        let txid = tx.txid();
        let mut removed = 0;
        for n in 0..tx.vout.len() {
            let outpoint = OutPoint::new(txid, n as u32);
            if self.contains_utxo(&outpoint)? {
                self.remove_utxo(&outpoint)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Full sweep: count, total value, and the name-locked portion.
    fn analyse(&self) -> Result<UtxoSummary, ChainError>;

    /// Iterate the whole set. Memory stores materialise a vector; the
    /// RocksDB store streams a column family.
    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, ChainError>;
}

/// Hash-map backed store for tests and the miner test pool.
#[derive(Clone, Debug, Default)]
pub struct MemoryUtxoStore {
    map: HashMap<OutPoint, UtxoEntry>,
}

impl MemoryUtxoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl UtxoStore for MemoryUtxoStore {
    fn read_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ChainError> {
        Ok(self.map.get(outpoint).cloned())
    }

    fn insert_utxo(&mut self, outpoint: OutPoint, entry: UtxoEntry) -> Result<(), ChainError> {
        if self.map.contains_key(&outpoint) {
            return Err(ChainError::UtxoExists(outpoint.to_string()));
        }
        self.map.insert(outpoint, entry);
        Ok(())
    }

    fn remove_utxo(&mut self, outpoint: &OutPoint) -> Result<(), ChainError> {
        if self.map.remove(outpoint).is_none() {
            return Err(ChainError::UtxoMissing(outpoint.to_string()));
        }
        Ok(())
    }

    fn analyse(&self) -> Result<UtxoSummary, ChainError> {
        let mut summary = UtxoSummary::default();
        for entry in self.map.values() {
            summary.count += 1;
            summary.total_amount += entry.txo.value;
            if matches!(classify(&entry.txo.script_pubkey), ScriptType::Name(_)) {
                summary.in_names_amount += entry.txo.value;
            }
        }
        Ok(summary)
    }

    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, ChainError> {
        Ok(self.map.iter().map(|(k, v)| (*k, v.clone())).collect())
    }
}
