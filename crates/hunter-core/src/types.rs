//! Core protocol types: transactions, blocks, UTXOs, name-index entries.
//!
//! All monetary values are in satoshi (1 HUC = 10^8 satoshi). Transaction
//! kinds are discriminated by the `version` field: ordinary transactions use
//! version 1, name operations [`NAMECOIN_TX_VERSION`], and derived game
//! transactions [`GAME_TX_VERSION`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auxpow::AuxPow;
use crate::constants::{GAME_TX_VERSION, NAMECOIN_TX_VERSION};
use crate::error::SerError;
use crate::hashing::{scrypt_pow, sha256d};
use crate::script::Script;

/// A 32-byte hash value (txids, block hashes, merkle roots).
///
/// Stored in digest byte order; `Display` renders the conventional
/// reversed hex of Bitcoin-lineage chains.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Used for null outpoints and the genesis prev-hash.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = SerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| SerError::InvalidValue("hash hex"))?;
        if raw.len() != 32 {
            return Err(SerError::InvalidValue("hash length"));
        }
        let mut bytes = [0u8; 32];
        for (i, b) in raw.iter().rev().enumerate() {
            bytes[i] = *b;
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    pub txid: Hash256,
    pub n: u32,
}

impl OutPoint {
    /// The null outpoint marking coinbase and treasury inputs.
    pub fn null() -> Self {
        Self { txid: Hash256::ZERO, n: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.n == u32::MAX
    }

    pub fn new(txid: Hash256, n: u32) -> Self {
        Self { txid, n }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.n)
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint, script_sig: Script) -> Self {
        Self { prevout, script_sig, sequence: u32::MAX }
    }
}

/// A transaction output, creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Script,
}

/// A transaction transferring value between scripts.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Transaction ID: double SHA-256 of the wire encoding.
    pub fn txid(&self) -> Hash256 {
        sha256d(&crate::ser::serialize(self))
    }

    /// Coinbase: a single input with the null prevout, not a game tx.
    pub fn is_coinbase(&self) -> bool {
        self.version != GAME_TX_VERSION
            && self.vin.len() == 1
            && self.vin[0].prevout.is_null()
    }

    /// Whether this transaction carries a name operation.
    pub fn is_name_tx(&self) -> bool {
        self.version == NAMECOIN_TX_VERSION
    }

    /// Whether this is a derived game transaction. Game transactions are
    /// produced only by the step function and never accepted on the wire.
    pub fn is_game_tx(&self) -> bool {
        self.version == GAME_TX_VERSION
    }

    /// Sum of all output values. `None` on overflow.
    pub fn total_output_value(&self) -> Option<i64> {
        self.vout.iter().try_fold(0i64, |acc, out| acc.checked_add(out.value))
    }
}

pub const BLOCK_VERSION_DEFAULT: i32 = 1;
/// Version bit signalling an attached auxiliary proof of work.
pub const BLOCK_VERSION_AUXPOW: i32 = 1 << 8;
/// Version bit selecting the scrypt mining algorithm.
pub const BLOCK_VERSION_SCRYPT: i32 = 1 << 9;
/// First bit of the merged-mining chain id.
pub const BLOCK_VERSION_CHAIN_START: i32 = 1 << 16;

/// Huntercoin's merged-mining chain id.
pub const AUXPOW_CHAIN_ID: i32 = 6;

/// Proof-of-work algorithm, selected by the block version bits.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowAlgo {
    Sha256d,
    Scrypt,
}

pub const NUM_ALGOS: usize = 2;

impl PowAlgo {
    pub fn from_version(version: i32) -> Self {
        if version & BLOCK_VERSION_SCRYPT != 0 {
            PowAlgo::Scrypt
        } else {
            PowAlgo::Sha256d
        }
    }

    pub fn index(self) -> usize {
        match self {
            PowAlgo::Sha256d => 0,
            PowAlgo::Scrypt => 1,
        }
    }
}

/// Block header. Commits to two merkle trees: the ordinary transaction set
/// and the derived game transaction set.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: Hash256,
    pub tx_merkle_root: Hash256,
    pub game_merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// Present iff `version & BLOCK_VERSION_AUXPOW` is set.
    pub aux_pow: Option<Box<AuxPow>>,
}

impl BlockHeader {
    /// The hashed prefix: all header fields except the auxpow payload.
    pub fn prefix_bytes(&self) -> [u8; 112] {
        let mut out = [0u8; 112];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.tx_merkle_root.as_bytes());
        out[68..100].copy_from_slice(self.game_merkle_root.as_bytes());
        out[100..104].copy_from_slice(&self.time.to_le_bytes());
        out[104..108].copy_from_slice(&self.bits.to_le_bytes());
        out[108..112].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Block identity hash: SHA-256d of the header prefix.
    pub fn hash(&self) -> Hash256 {
        sha256d(&self.prefix_bytes())
    }

    /// The hash checked against the difficulty target. For auxpow blocks
    /// the parent header is hashed instead; see [`crate::pow`].
    pub fn pow_hash(&self) -> Hash256 {
        match self.algo() {
            PowAlgo::Sha256d => self.hash(),
            PowAlgo::Scrypt => scrypt_pow(&self.prefix_bytes()),
        }
    }

    pub fn algo(&self) -> PowAlgo {
        PowAlgo::from_version(self.version)
    }

    pub fn has_auxpow_bit(&self) -> bool {
        self.version & BLOCK_VERSION_AUXPOW != 0
    }

    /// Merged-mining chain id carried in the high version bits.
    pub fn chain_id(&self) -> i32 {
        self.version / BLOCK_VERSION_CHAIN_START
    }
}

/// A complete block: header, ordinary transactions, derived game
/// transactions. `vtx[0]` is the coinbase.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub vtx: Vec<Transaction>,
    pub vgametx: Vec<Transaction>,
}

impl Block {
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.vtx.first()
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

/// An entry in the unspent transaction output set.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UtxoEntry {
    pub txo: TxOut,
    pub height: i32,
    pub is_coinbase: bool,
    pub is_game_tx: bool,
}

impl UtxoEntry {
    /// Coinbase and game rewards mature after 100 confirmations;
    /// everything else is spendable immediately.
    pub fn is_mature(&self, current_height: i32) -> bool {
        if !self.is_coinbase && !self.is_game_tx {
            return true;
        }
        current_height - self.height >= crate::constants::COINBASE_MATURITY
    }
}

/// Location of a confirmed transaction, recorded in the tx and name indexes.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxPos {
    pub txid: Hash256,
    pub block_hash: Hash256,
    pub tx_index: u32,
}
