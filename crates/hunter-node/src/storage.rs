//! RocksDB-backed chain storage.
//!
//! Implements [`ChainStorage`] with one column family per logical store:
//! blocks (wire encoding), tx index, UTXO set, name index, game-state
//! snapshots, and metadata. Writes between `begin` and `commit` accumulate
//! in an in-memory overlay that reads see through, then land in a single
//! atomic [`WriteBatch`] — one per block connect/disconnect, or one per
//! whole reorganisation.

use std::collections::BTreeMap;
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use hunter_core::error::ChainError;
use hunter_core::names::NameEntry;
use hunter_core::script::{classify, ScriptType};
use hunter_core::ser;
use hunter_core::types::{Block, Hash256, OutPoint, TxPos, UtxoEntry};
use hunter_core::utxo::UtxoSummary;

use hunter_game::state::GameState;

use hunter_consensus::storage::ChainStorage;

const CF_BLOCKS: &str = "blocks";
const CF_TXINDEX: &str = "txindex";
const CF_UTXOS: &str = "utxos";
const CF_NAMES: &str = "names";
const CF_GAMESTATES: &str = "gamestates";
const CF_META: &str = "meta";

const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_TXINDEX, CF_UTXOS, CF_NAMES, CF_GAMESTATES, CF_META];

const META_BEST_HASH: &[u8] = b"best_hash";

fn storage_err(e: impl std::fmt::Display) -> ChainError {
    ChainError::Storage(e.to_string())
}

fn utxo_key(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(outpoint.txid.as_bytes());
    key.extend_from_slice(&outpoint.n.to_le_bytes());
    key
}

fn game_state_key(height: i32) -> [u8; 4] {
    // Big-endian keys keep the column family height-ordered.
    (height as u32).to_be_bytes()
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, ChainError> {
    bincode::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, ChainError> {
    let (value, _) =
        bincode::decode_from_slice(bytes, bincode::config::standard()).map_err(storage_err)?;
    Ok(value)
}

/// Pending writes of an open transaction: per column family,
/// key → `Some(value)` for a put, `None` for a delete.
type Overlay = BTreeMap<&'static str, BTreeMap<Vec<u8>, Option<Vec<u8>>>>;

pub struct RocksStorage {
    db: DB,
    txn: Option<Overlay>,
}

impl RocksStorage {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        let cfs: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();
        let db = DB::open_cf_descriptors(&db_opts, path, cfs).map_err(storage_err)?;
        Ok(Self { db, txn: None })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, ChainError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ChainError::Storage(format!("missing column family {name}")))
    }

    /// Read through the overlay, then the database.
    fn get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
        if let Some(overlay) = &self.txn {
            if let Some(pending) = overlay.get(cf).and_then(|m| m.get(key)) {
                return Ok(pending.clone());
            }
        }
        self.db.get_cf(self.cf(cf)?, key).map_err(storage_err)
    }

    fn put(&mut self, cf: &'static str, key: Vec<u8>, value: Vec<u8>) -> Result<(), ChainError> {
        match &mut self.txn {
            Some(overlay) => {
                overlay.entry(cf).or_default().insert(key, Some(value));
                Ok(())
            }
            None => self
                .db
                .put_cf(self.cf(cf)?, key, value)
                .map_err(storage_err),
        }
    }

    fn delete(&mut self, cf: &'static str, key: Vec<u8>) -> Result<(), ChainError> {
        match &mut self.txn {
            Some(overlay) => {
                overlay.entry(cf).or_default().insert(key, None);
                Ok(())
            }
            None => self.db.delete_cf(self.cf(cf)?, key).map_err(storage_err),
        }
    }

    /// All live `(key, value)` pairs of a column family, overlay applied.
    fn scan(&self, cf: &'static str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ChainError> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        for item in self.db.iterator_cf(self.cf(cf)?, rocksdb::IteratorMode::Start) {
            let (key, value) = item.map_err(storage_err)?;
            merged.insert(key.to_vec(), Some(value.to_vec()));
        }
        if let Some(overlay) = &self.txn {
            if let Some(pending) = overlay.get(cf) {
                for (key, value) in pending {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    fn name_entries(&self, name: &[u8]) -> Result<Vec<NameEntry>, ChainError> {
        match self.get(CF_NAMES, name)? {
            None => Ok(Vec::new()),
            Some(bytes) => decode(&bytes),
        }
    }

    fn write_name_entries(
        &mut self,
        name: &[u8],
        entries: &[NameEntry],
    ) -> Result<(), ChainError> {
        if entries.is_empty() {
            self.delete(CF_NAMES, name.to_vec())
        } else {
            self.put(CF_NAMES, name.to_vec(), encode(&entries.to_vec())?)
        }
    }

    /// Wipe the name index (before a rescan).
    pub fn clear_names(&mut self) -> Result<(), ChainError> {
        let names: Vec<Vec<u8>> =
            self.scan(CF_NAMES)?.into_iter().map(|(k, _)| k).collect();
        for name in names {
            self.delete(CF_NAMES, name)?;
        }
        Ok(())
    }

    /// Whether the name index holds any entry at all.
    pub fn names_empty(&self) -> Result<bool, ChainError> {
        Ok(self.scan(CF_NAMES)?.is_empty())
    }
}

impl ChainStorage for RocksStorage {
    fn begin(&mut self) {
        debug_assert!(self.txn.is_none(), "transactions do not nest");
        self.txn = Some(Overlay::new());
    }

    fn commit(&mut self) -> Result<(), ChainError> {
        let Some(overlay) = self.txn.take() else {
            return Ok(());
        };
        let mut batch = WriteBatch::default();
        for (cf_name, writes) in overlay {
            let cf = self.cf(cf_name)?;
            for (key, value) in writes {
                match value {
                    Some(value) => batch.put_cf(cf, key, value),
                    None => batch.delete_cf(cf, key),
                }
            }
        }
        self.db.write(batch).map_err(storage_err)
    }

    fn abort(&mut self) {
        self.txn = None;
    }

    fn read_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ChainError> {
        match self.get(CF_UTXOS, &utxo_key(outpoint))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode(&bytes)?)),
        }
    }

    fn insert_utxo(&mut self, outpoint: OutPoint, entry: UtxoEntry) -> Result<(), ChainError> {
        if self.read_utxo(&outpoint)?.is_some() {
            return Err(ChainError::UtxoExists(outpoint.to_string()));
        }
        self.put(CF_UTXOS, utxo_key(&outpoint), encode(&entry)?)
    }

    fn remove_utxo(&mut self, outpoint: &OutPoint) -> Result<(), ChainError> {
        if self.read_utxo(outpoint)?.is_none() {
            return Err(ChainError::UtxoMissing(outpoint.to_string()));
        }
        self.delete(CF_UTXOS, utxo_key(outpoint))
    }

    fn clear_utxos(&mut self) -> Result<(), ChainError> {
        let keys: Vec<Vec<u8>> =
            self.scan(CF_UTXOS)?.into_iter().map(|(k, _)| k).collect();
        for key in keys {
            self.delete(CF_UTXOS, key)?;
        }
        Ok(())
    }

    fn utxo_summary(&self) -> Result<UtxoSummary, ChainError> {
        let mut summary = UtxoSummary::default();
        for (_, bytes) in self.scan(CF_UTXOS)? {
            let entry: UtxoEntry = decode(&bytes)?;
            summary.count += 1;
            summary.total_amount += entry.txo.value;
            if matches!(classify(&entry.txo.script_pubkey), ScriptType::Name(_)) {
                summary.in_names_amount += entry.txo.value;
            }
        }
        Ok(summary)
    }

    fn name_push(&mut self, name: &[u8], entry: NameEntry) -> Result<(), ChainError> {
        let mut entries = self.name_entries(name)?;
        entries.push(entry);
        self.write_name_entries(name, &entries)
    }

    fn name_pop(&mut self, name: &[u8], height: i32) -> Result<(), ChainError> {
        let mut entries = self.name_entries(name)?;
        let before = entries.len();
        while entries.last().is_some_and(|e| e.height == height) {
            entries.pop();
        }
        if entries.len() == before {
            return Err(ChainError::NameEntryMissing(
                String::from_utf8_lossy(name).into_owned(),
                height,
            ));
        }
        self.write_name_entries(name, &entries)
    }

    fn name_read(&self, name: &[u8]) -> Result<Option<NameEntry>, ChainError> {
        Ok(self.name_entries(name)?.into_iter().next_back())
    }

    fn name_history(&self, name: &[u8]) -> Result<Vec<NameEntry>, ChainError> {
        self.name_entries(name)
    }

    fn name_scan(
        &self,
        start: &[u8],
        max: usize,
    ) -> Result<Vec<(Vec<u8>, NameEntry)>, ChainError> {
        let mut out = Vec::new();
        for (name, bytes) in self.scan(CF_NAMES)? {
            if name.as_slice() < start {
                continue;
            }
            if out.len() == max {
                break;
            }
            let entries: Vec<NameEntry> = decode(&bytes)?;
            if let Some(last) = entries.into_iter().next_back() {
                out.push((name, last));
            }
        }
        Ok(out)
    }

    fn name_prune(&mut self, before_height: i32) -> Result<usize, ChainError> {
        let mut dropped = 0;
        let names: Vec<Vec<u8>> =
            self.scan(CF_NAMES)?.into_iter().map(|(k, _)| k).collect();
        for name in names {
            let mut entries = self.name_entries(&name)?;
            let before = entries.len();
            while entries.len() > 1 && entries[0].height < before_height {
                entries.remove(0);
            }
            if entries.len() != before {
                dropped += before - entries.len();
                self.write_name_entries(&name, &entries)?;
            }
        }
        Ok(dropped)
    }

    fn write_block(&mut self, block: &Block) -> Result<(), ChainError> {
        self.put(
            CF_BLOCKS,
            block.hash().as_bytes().to_vec(),
            ser::serialize(block),
        )
    }

    fn read_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        match self.get(CF_BLOCKS, hash.as_bytes())? {
            None => Ok(None),
            Some(bytes) => Ok(Some(ser::deserialize(&bytes).map_err(storage_err)?)),
        }
    }

    fn all_blocks(&self) -> Result<Vec<Block>, ChainError> {
        self.scan(CF_BLOCKS)?
            .into_iter()
            .map(|(_, bytes)| ser::deserialize(&bytes).map_err(storage_err))
            .collect()
    }

    fn write_tx_index(&mut self, txid: &Hash256, pos: TxPos) -> Result<(), ChainError> {
        self.put(CF_TXINDEX, txid.as_bytes().to_vec(), encode(&pos)?)
    }

    fn erase_tx_index(&mut self, txid: &Hash256) -> Result<(), ChainError> {
        self.delete(CF_TXINDEX, txid.as_bytes().to_vec())
    }

    fn read_tx_index(&self, txid: &Hash256) -> Result<Option<TxPos>, ChainError> {
        match self.get(CF_TXINDEX, txid.as_bytes())? {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode(&bytes)?)),
        }
    }

    fn write_game_state(&mut self, height: i32, state: &GameState) -> Result<(), ChainError> {
        self.put(CF_GAMESTATES, game_state_key(height).to_vec(), encode(state)?)
    }

    fn read_game_state(&self, height: i32) -> Result<Option<GameState>, ChainError> {
        match self.get(CF_GAMESTATES, &game_state_key(height))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode(&bytes)?)),
        }
    }

    fn erase_game_state(&mut self, height: i32) -> Result<(), ChainError> {
        self.delete(CF_GAMESTATES, game_state_key(height).to_vec())
    }

    fn game_state_heights(&self) -> Result<Vec<i32>, ChainError> {
        Ok(self
            .scan(CF_GAMESTATES)?
            .into_iter()
            .filter_map(|(key, _)| {
                key.try_into().ok().map(|k: [u8; 4]| u32::from_be_bytes(k) as i32)
            })
            .collect())
    }

    fn best_hash(&self) -> Result<Option<Hash256>, ChainError> {
        match self.get(CF_META, META_BEST_HASH)? {
            None => Ok(None),
            Some(bytes) => {
                let bytes: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| ChainError::Storage("corrupt best hash".into()))?;
                Ok(Some(Hash256(bytes)))
            }
        }
    }

    fn set_best_hash(&mut self, hash: &Hash256) -> Result<(), ChainError> {
        self.put(CF_META, META_BEST_HASH.to_vec(), hash.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hunter_core::constants::COIN;
    use hunter_core::script::{p2pkh_script, Script};
    use hunter_core::types::{Transaction, TxIn, TxOut};

    fn open_temp() -> (RocksStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (RocksStorage::open(dir.path()).unwrap(), dir)
    }

    fn sample_entry(value: i64) -> UtxoEntry {
        UtxoEntry {
            txo: TxOut { value, script_pubkey: p2pkh_script(&[1; 20]) },
            height: 7,
            is_coinbase: false,
            is_game_tx: false,
        }
    }

    #[test]
    fn utxo_roundtrip_and_double_insert() {
        let (mut storage, _dir) = open_temp();
        let op = OutPoint::new(Hash256([1; 32]), 0);
        storage.insert_utxo(op, sample_entry(COIN)).unwrap();
        assert_eq!(storage.read_utxo(&op).unwrap().unwrap().txo.value, COIN);
        assert!(matches!(
            storage.insert_utxo(op, sample_entry(COIN)),
            Err(ChainError::UtxoExists(_)),
        ));
        storage.remove_utxo(&op).unwrap();
        assert!(storage.read_utxo(&op).unwrap().is_none());
    }

    #[test]
    fn overlay_reads_pending_writes_and_abort_discards() {
        let (mut storage, _dir) = open_temp();
        let op = OutPoint::new(Hash256([2; 32]), 1);

        storage.begin();
        storage.insert_utxo(op, sample_entry(5)).unwrap();
        // Visible inside the transaction.
        assert!(storage.read_utxo(&op).unwrap().is_some());
        storage.abort();
        assert!(storage.read_utxo(&op).unwrap().is_none());

        storage.begin();
        storage.insert_utxo(op, sample_entry(5)).unwrap();
        storage.commit().unwrap();
        assert!(storage.read_utxo(&op).unwrap().is_some());
    }

    #[test]
    fn overlay_delete_shadows_database() {
        let (mut storage, _dir) = open_temp();
        let op = OutPoint::new(Hash256([3; 32]), 0);
        storage.insert_utxo(op, sample_entry(9)).unwrap();

        storage.begin();
        storage.remove_utxo(&op).unwrap();
        assert!(storage.read_utxo(&op).unwrap().is_none());
        // Still gone after commit; summary agrees.
        storage.commit().unwrap();
        assert!(storage.read_utxo(&op).unwrap().is_none());
        assert_eq!(storage.utxo_summary().unwrap().count, 0);
    }

    #[test]
    fn name_index_roundtrip() {
        let (mut storage, _dir) = open_temp();
        let pos = TxPos {
            txid: Hash256([4; 32]),
            block_hash: Hash256([5; 32]),
            tx_index: 1,
        };
        storage
            .name_push(b"alice", NameEntry { height: 3, value: b"a".to_vec(), tx_pos: pos })
            .unwrap();
        storage
            .name_push(b"alice", NameEntry { height: 5, value: b"b".to_vec(), tx_pos: pos })
            .unwrap();
        assert_eq!(storage.name_read(b"alice").unwrap().unwrap().height, 5);
        assert_eq!(storage.name_history(b"alice").unwrap().len(), 2);

        storage.name_pop(b"alice", 5).unwrap();
        assert_eq!(storage.name_read(b"alice").unwrap().unwrap().height, 3);
        assert!(storage.name_pop(b"alice", 99).is_err());

        storage.name_pop(b"alice", 3).unwrap();
        assert!(storage.name_read(b"alice").unwrap().is_none());
        assert!(storage.names_empty().unwrap());
    }

    #[test]
    fn block_and_tx_index_roundtrip() {
        let (mut storage, _dir) = open_temp();
        let tx = Transaction {
            version: 1,
            vin: vec![TxIn::new(OutPoint::null(), Script::from_bytes(vec![0, 0]))],
            vout: vec![TxOut { value: COIN, script_pubkey: p2pkh_script(&[2; 20]) }],
            lock_time: 0,
        };
        let block = Block {
            header: hunter_core::types::BlockHeader {
                version: 1,
                prev_hash: Hash256::ZERO,
                tx_merkle_root: Hash256([6; 32]),
                game_merkle_root: Hash256::ZERO,
                time: 99,
                bits: 0x1d00ffff,
                nonce: 1,
                aux_pow: None,
            },
            vtx: vec![tx.clone()],
            vgametx: vec![],
        };
        storage.write_block(&block).unwrap();
        let pos = TxPos { txid: tx.txid(), block_hash: block.hash(), tx_index: 0 };
        storage.write_tx_index(&tx.txid(), pos).unwrap();

        assert_eq!(storage.read_block(&block.hash()).unwrap().unwrap(), block);
        assert_eq!(storage.all_blocks().unwrap().len(), 1);
        let (found, _) = storage.read_tx(&tx.txid()).unwrap().unwrap();
        assert_eq!(found, tx);
    }

    #[test]
    fn game_snapshots_ordered_by_height() {
        let (mut storage, _dir) = open_temp();
        let mut state = GameState::new();
        for h in [4000, 0, 2000] {
            state.height = h;
            storage.write_game_state(h, &state).unwrap();
        }
        assert_eq!(storage.game_state_heights().unwrap(), vec![0, 2000, 4000]);
        let (anchor, _) = storage.latest_game_state_at_or_below(2500).unwrap().unwrap();
        assert_eq!(anchor, 2000);
        storage.erase_game_state(2000).unwrap();
        assert_eq!(storage.game_state_heights().unwrap(), vec![0, 4000]);
    }

    #[test]
    fn best_hash_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut storage = RocksStorage::open(dir.path()).unwrap();
            storage.set_best_hash(&Hash256([7; 32])).unwrap();
        }
        let storage = RocksStorage::open(dir.path()).unwrap();
        assert_eq!(storage.best_hash().unwrap(), Some(Hash256([7; 32])));
    }
}
