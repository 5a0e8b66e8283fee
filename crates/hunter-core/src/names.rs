//! The name index: player identity to value history.
//!
//! Keyed by raw name bytes (at most 10). Each name maps to a vector of
//! entries appended in chain order; the last entry is authoritative. A
//! killed player is recorded by appending the [`VALUE_DEAD`] marker, after
//! which the name becomes available for re-registration.

use std::collections::BTreeMap;

use crate::constants::VALUE_DEAD;
use crate::error::ChainError;
use crate::types::TxPos;

/// One confirmed name operation.
#[derive(
    serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct NameEntry {
    pub height: i32,
    pub value: Vec<u8>,
    pub tx_pos: TxPos,
}

impl NameEntry {
    pub fn is_dead(&self) -> bool {
        self.value == VALUE_DEAD
    }
}

/// Mutable interface to the name index.
pub trait NameIndex {
    /// Append an entry to a name's history.
    fn push_entry(&mut self, name: &[u8], entry: NameEntry) -> Result<(), ChainError>;

    /// Remove the trailing entries recorded at exactly `height` (block
    /// disconnect). Entries below that height are never touched.
    fn pop_entry(&mut self, name: &[u8], height: i32) -> Result<(), ChainError>;

    /// The authoritative (latest) entry for a name.
    fn read_name(&self, name: &[u8]) -> Result<Option<NameEntry>, ChainError>;

    fn exists_name(&self, name: &[u8]) -> Result<bool, ChainError> {
        Ok(self.read_name(name)?.is_some())
    }

    /// Full history of a name in chain order.
    fn history(&self, name: &[u8]) -> Result<Vec<NameEntry>, ChainError>;

    /// Up to `max` names starting at `start`, in lexicographic order.
    fn scan_names(&self, start: &[u8], max: usize)
        -> Result<Vec<(Vec<u8>, NameEntry)>, ChainError>;

    /// Drop history entries older than `before_height`, keeping at least
    /// the latest entry per name. Returns the number dropped.
    fn prune(&mut self, before_height: i32) -> Result<usize, ChainError>;

    /// A name can be (re)registered when it has no entry, or its latest
    /// entry is the dead marker.
    fn name_available(&self, name: &[u8]) -> Result<bool, ChainError> {
        Ok(match self.read_name(name)? {
            None => true,
            Some(entry) => entry.is_dead(),
        })
    }
}

/// Ordered-map backed index for tests; the node provides RocksDB.
#[derive(Clone, Debug, Default)]
pub struct MemoryNameIndex {
    map: BTreeMap<Vec<u8>, Vec<NameEntry>>,
}

impl MemoryNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_count(&self) -> usize {
        self.map.len()
    }
}

impl NameIndex for MemoryNameIndex {
    fn push_entry(&mut self, name: &[u8], entry: NameEntry) -> Result<(), ChainError> {
        self.map.entry(name.to_vec()).or_default().push(entry);
        Ok(())
    }

    fn pop_entry(&mut self, name: &[u8], height: i32) -> Result<(), ChainError> {
        let entries = self.map.get_mut(name).ok_or_else(|| {
            ChainError::NameEntryMissing(String::from_utf8_lossy(name).into_owned(), height)
        })?;
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
        if entries.is_empty() {
            self.map.remove(name);
        }
        Ok(())
    }

    fn read_name(&self, name: &[u8]) -> Result<Option<NameEntry>, ChainError> {
        Ok(self.map.get(name).and_then(|v| v.last().cloned()))
    }

    fn history(&self, name: &[u8]) -> Result<Vec<NameEntry>, ChainError> {
        Ok(self.map.get(name).cloned().unwrap_or_default())
    }

    fn scan_names(
        &self,
        start: &[u8],
        max: usize,
    ) -> Result<Vec<(Vec<u8>, NameEntry)>, ChainError> {
        Ok(self
            .map
            .range(start.to_vec()..)
            .take(max)
            .filter_map(|(name, entries)| {
                entries.last().map(|e| (name.clone(), e.clone()))
            })
            .collect())
    }

    fn prune(&mut self, before_height: i32) -> Result<usize, ChainError> {
        let mut dropped = 0;
        for entries in self.map.values_mut() {
            while entries.len() > 1 && entries[0].height < before_height {
                entries.remove(0);
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}
