//! The pool of unconfirmed transactions.
//!
//! Indexed by txid with a spent-outpoint reverse index for O(1) conflict
//! detection. Replacement is not supported: a transaction conflicting with
//! an existing pool entry is rejected outright. Name operations are also
//! tracked per name so that two pending operations on one player cannot
//! coexist, and free transactions are throttled by a decaying token
//! bucket.
//!
//! Contextual validation is delegated to caller-supplied closures (UTXO
//! view and game-move check) so the pool itself stays storage-agnostic.

use std::collections::{BTreeSet, HashMap};

use crate::constants::{
    MIN_TX_FEE, MIN_TX_SIZE, NAME_UPDATE_LEN_FEE, NAME_UPDATE_MIN_FEE, Network,
};
use crate::error::{MempoolError, TransactionError};
use crate::script::{decode_name_script, NameOp};
use crate::types::{Block, Hash256, OutPoint, Transaction, UtxoEntry};
use crate::validation::{
    self, check_transaction, connect_inputs, is_standard_tx, tx_sig_op_count,
};

/// Burst size of the free-transaction limiter, in bytes.
const FREE_TX_BURST: f64 = (60 * 10 * 1000) as f64;
/// Decay half-life parameter: the bucket drains as `(1 - 1/600)^dt`.
const FREE_TX_DECAY: f64 = 1.0 - 1.0 / 600.0;

/// A transaction resident in the pool.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    pub fee: i64,
    pub size: usize,
    /// Unix seconds at acceptance, used for template ordering.
    pub time: u64,
}

/// Inputs the pool needs from its environment to judge a transaction.
pub struct AcceptContext<'a> {
    /// Height the next block will have.
    pub height: i32,
    pub now: u64,
    /// UTXO view over confirmed state.
    pub get_utxo: &'a dyn Fn(&OutPoint) -> Option<UtxoEntry>,
    /// Game-rule check for move-carrying name transactions: the move must
    /// still be valid against the current game state.
    pub check_move: &'a dyn Fn(&Transaction) -> Result<(), TransactionError>,
}

/// The mempool.
pub struct Mempool {
    network: Network,
    entries: HashMap<Hash256, MempoolEntry>,
    by_outpoint: HashMap<OutPoint, Hash256>,
    name_pending: HashMap<Vec<u8>, BTreeSet<Hash256>>,
    free_bucket: f64,
    last_free_time: u64,
}

impl Mempool {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            entries: HashMap::new(),
            by_outpoint: HashMap::new(),
            name_pending: HashMap::new(),
            free_bucket: 0.0,
            last_free_time: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// Pending operations on a name, if any.
    pub fn pending_for_name(&self, name: &[u8]) -> Vec<Hash256> {
        self.name_pending
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All pending names with their txids.
    pub fn pending_names(&self) -> Vec<(Vec<u8>, Vec<Hash256>)> {
        let mut out: Vec<(Vec<u8>, Vec<Hash256>)> = self
            .name_pending
            .iter()
            .map(|(name, set)| (name.clone(), set.iter().copied().collect()))
            .collect();
        out.sort();
        out
    }

    /// Entries ordered by acceptance time (block template order).
    pub fn candidates(&self) -> Vec<MempoolEntry> {
        let mut list: Vec<MempoolEntry> = self.entries.values().cloned().collect();
        list.sort_by_key(|e| (e.time, e.txid));
        list
    }

    /// The mandatory fee for a transaction of `size` bytes; name updates
    /// carry an additional value-length component.
    pub fn required_fee(size: usize, name_update_value_len: Option<usize>) -> i64 {
        let mut fee = if size < 10_000 {
            0
        } else {
            (1 + size as i64 / 1000) * MIN_TX_FEE
        };
        if let Some(len) = name_update_value_len {
            let update_fee = NAME_UPDATE_MIN_FEE + NAME_UPDATE_LEN_FEE * (len as i64 / 100);
            fee = fee.max(update_fee);
        }
        fee
    }

    /// Validate and insert a transaction.
    pub fn accept(
        &mut self,
        tx: Transaction,
        ctx: &AcceptContext<'_>,
    ) -> Result<Hash256, MempoolError> {
        check_transaction(&tx)?;
        if tx.is_coinbase() {
            return Err(MempoolError::Coinbase);
        }

        let bytes = crate::ser::serialize(&tx);
        let size = bytes.len();
        let txid = tx.txid();

        if self.entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }
        if size < MIN_TX_SIZE {
            return Err(MempoolError::Undersized(size));
        }
        if tx_sig_op_count(&tx) > size / 34 {
            return Err(MempoolError::TooManySigOps);
        }
        if self.network == Network::Mainnet && !is_standard_tx(&tx) {
            return Err(MempoolError::NonStandard);
        }

        // No replacement: any conflict on an outpoint is a rejection.
        for input in &tx.vin {
            if let Some(existing) = self.by_outpoint.get(&input.prevout) {
                return Err(MempoolError::Conflict {
                    existing: existing.to_string(),
                    outpoint: input.prevout.to_string(),
                });
            }
        }

        // One pending operation per name; name_new commitments are exempt
        // (they do not reveal the name).
        let name_key = self.name_tx_key(&tx);
        if let Some(name) = &name_key {
            if self.name_pending.get(name).is_some_and(|set| !set.is_empty()) {
                return Err(MempoolError::PendingName(
                    String::from_utf8_lossy(name).into_owned(),
                ));
            }
        }

        if validation::has_unexpected_name_io(&tx, ctx.get_utxo) {
            return Err(TransactionError::NameRuleViolation(
                "name input or output on non-name tx".into(),
            )
            .into());
        }

        let flow = connect_inputs(&tx, ctx.get_utxo, ctx.height, true)?;

        if tx.is_name_tx() {
            (ctx.check_move)(&tx)?;
        }

        let name_update_len = decode_name_script_value_len(&tx);
        let required = Self::required_fee(size, name_update_len);
        if flow.fee < required {
            return Err(TransactionError::InsufficientFee {
                fee: flow.fee,
                required,
            }
            .into());
        }

        // Rate-limit transactions riding for free.
        if flow.fee < MIN_TX_FEE && required == 0 {
            let dt = ctx.now.saturating_sub(self.last_free_time);
            self.free_bucket *= FREE_TX_DECAY.powi(dt.min(36_000) as i32);
            self.last_free_time = ctx.now;
            if self.free_bucket + size as f64 > FREE_TX_BURST {
                return Err(MempoolError::RateLimited);
            }
            self.free_bucket += size as f64;
        }

        for input in &tx.vin {
            self.by_outpoint.insert(input.prevout, txid);
        }
        if let Some(name) = name_key {
            self.name_pending.entry(name).or_default().insert(txid);
        }
        self.entries.insert(
            txid,
            MempoolEntry { tx, txid, fee: flow.fee, size, time: ctx.now },
        );
        Ok(txid)
    }

    /// Remove a transaction by txid, cleaning all indexes.
    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.vin {
            self.by_outpoint.remove(&input.prevout);
        }
        if let Some(name) = self.name_tx_key(&entry.tx) {
            if let Some(set) = self.name_pending.get_mut(&name) {
                set.remove(txid);
                if set.is_empty() {
                    self.name_pending.remove(&name);
                }
            }
        }
        Some(entry)
    }

    /// Purge everything a connected block makes invalid: its own
    /// transactions plus any pool entry double-spending their inputs.
    /// Returns the removed txids.
    pub fn remove_for_block(&mut self, block: &Block) -> Vec<Hash256> {
        let mut removed = Vec::new();
        for tx in block.vtx.iter().chain(block.vgametx.iter()) {
            let txid = tx.txid();
            if self.remove(&txid).is_some() {
                removed.push(txid);
            }
            for input in &tx.vin {
                if let Some(conflict) = self.by_outpoint.get(&input.prevout).copied() {
                    if self.remove(&conflict).is_some() {
                        removed.push(conflict);
                    }
                }
            }
        }
        removed
    }

    /// The name a transaction operates on, for pending tracking.
    /// `name_new` commitments return `None`.
    fn name_tx_key(&self, tx: &Transaction) -> Option<Vec<u8>> {
        if !tx.is_name_tx() {
            return None;
        }
        for out in &tx.vout {
            if let Some(ns) = decode_name_script(&out.script_pubkey) {
                if !matches!(ns.op, NameOp::New) {
                    return ns.name().map(|n| n.to_vec());
                }
            }
        }
        None
    }
}

fn decode_name_script_value_len(tx: &Transaction) -> Option<usize> {
    if !tx.is_name_tx() {
        return None;
    }
    for out in &tx.vout {
        if let Some(ns) = decode_name_script(&out.script_pubkey) {
            if matches!(ns.op, NameOp::Update) {
                return ns.value().map(|v| v.len());
            }
        }
    }
    None
}
