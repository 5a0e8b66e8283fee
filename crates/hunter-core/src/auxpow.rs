//! Auxiliary proof of work for merged mining.
//!
//! An auxpow block does not carry its own proof of work. Instead it embeds
//! a parent-chain coinbase transaction whose scriptSig commits to this
//! block's hash; the parent header's PoW then counts for this chain. The
//! commitment is a merkle branch into a small "auxiliary chains" tree whose
//! slot for our chain id is fixed by a pseudo-random formula, so one parent
//! miner cannot claim the same slot for two conflicting child chains.

use crate::error::BlockError;
use crate::hashing::{scrypt_pow, sha256d};
use crate::merkle::check_merkle_branch;
use crate::types::{Hash256, PowAlgo, Transaction, BLOCK_VERSION_AUXPOW, BLOCK_VERSION_CHAIN_START};

/// Magic bytes introducing the merged-mining commitment in the parent
/// coinbase scriptSig.
pub const MERGED_MINING_HEADER: [u8; 4] = [0xFA, 0xBE, b'm', b'm'];

/// Header of the parent chain's block. The parent chain has no game, so
/// its header is the plain 80-byte Bitcoin layout.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ParentBlockHeader {
    pub version: i32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl ParentBlockHeader {
    pub fn prefix_bytes(&self) -> [u8; 80] {
        let mut out = [0u8; 80];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.prefix_bytes())
    }

    /// The hash compared against the child chain's difficulty target.
    pub fn pow_hash(&self, algo: PowAlgo) -> Hash256 {
        match algo {
            PowAlgo::Sha256d => self.hash(),
            PowAlgo::Scrypt => scrypt_pow(&self.prefix_bytes()),
        }
    }

    pub fn chain_id(&self) -> i32 {
        self.version / BLOCK_VERSION_CHAIN_START
    }

    pub fn has_auxpow_bit(&self) -> bool {
        self.version & BLOCK_VERSION_AUXPOW != 0
    }
}

/// The auxiliary proof-of-work structure attached to a merged-mined header.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AuxPow {
    /// Parent-chain coinbase carrying the commitment in its scriptSig.
    pub coinbase_tx: Transaction,
    /// Hash of the parent block, carried on the wire but recomputed here.
    pub parent_block_hash: Hash256,
    /// Branch linking the coinbase txid into the parent merkle root.
    pub coinbase_branch: Vec<Hash256>,
    pub coinbase_index: u32,
    /// Branch linking our block hash into the auxiliary-chains root.
    pub blockchain_branch: Vec<Hash256>,
    pub chain_index: u32,
    pub parent_header: ParentBlockHeader,
}

impl AuxPow {
    /// Verify the commitment chain from `block_hash` up to the parent
    /// header. Target satisfaction is checked separately by
    /// [`crate::pow::check_proof_of_work`].
    pub fn check(&self, block_hash: Hash256, chain_id: i32, algo: PowAlgo) -> Result<(), BlockError> {
        if self.parent_header.has_auxpow_bit() {
            return Err(BlockError::BadAuxPow("parent block is itself an auxpow block".into()));
        }
        if self.parent_header.chain_id() == chain_id {
            return Err(BlockError::BadAuxPow("parent chain id equals our chain id".into()));
        }
        if PowAlgo::from_version(self.parent_header.version) != algo {
            return Err(BlockError::BadAuxPow("parent algorithm mismatch".into()));
        }
        if self.coinbase_index != 0 {
            return Err(BlockError::BadAuxPow("coinbase must be the first parent tx".into()));
        }
        if self.blockchain_branch.len() > 30 {
            return Err(BlockError::BadAuxPow("auxiliary branch too deep".into()));
        }

        let coinbase_txid = self.coinbase_tx.txid();
        let computed_parent_root =
            check_merkle_branch(coinbase_txid, &self.coinbase_branch, self.coinbase_index);
        if computed_parent_root != self.parent_header.merkle_root {
            return Err(BlockError::BadAuxPow("coinbase branch does not reach parent root".into()));
        }

        // The aux root embedded in the coinbase is in display (reversed)
        // byte order.
        let aux_root =
            check_merkle_branch(block_hash, &self.blockchain_branch, self.chain_index);
        let mut aux_root_reversed = *aux_root.as_bytes();
        aux_root_reversed.reverse();

        let script = match self.coinbase_tx.vin.first() {
            Some(input) => input.script_sig.as_bytes(),
            None => return Err(BlockError::BadAuxPow("parent coinbase has no input".into())),
        };

        let header_pos = match find_subslice(script, &MERGED_MINING_HEADER) {
            Some(pos) => pos,
            None => return Err(BlockError::BadAuxPow("merged-mining header not found".into())),
        };
        if find_subslice(&script[header_pos + 1..], &MERGED_MINING_HEADER).is_some() {
            return Err(BlockError::BadAuxPow("multiple merged-mining headers".into()));
        }

        let payload = &script[header_pos + MERGED_MINING_HEADER.len()..];
        if payload.len() < 32 + 8 {
            return Err(BlockError::BadAuxPow("commitment truncated".into()));
        }
        if payload[..32] != aux_root_reversed {
            return Err(BlockError::BadAuxPow("aux root mismatch".into()));
        }

        let merkle_size = u32::from_le_bytes(payload[32..36].try_into().unwrap());
        let merkle_nonce = u32::from_le_bytes(payload[36..40].try_into().unwrap());
        if merkle_size != 1u32 << self.blockchain_branch.len() {
            return Err(BlockError::BadAuxPow("merkle size does not match branch depth".into()));
        }
        let expected = expected_chain_index(merkle_nonce, chain_id, self.blockchain_branch.len());
        if self.chain_index != expected {
            return Err(BlockError::BadAuxPow("wrong auxiliary chain slot".into()));
        }

        Ok(())
    }
}

/// The deterministic slot our chain id occupies in a parent's auxiliary
/// tree of the given depth.
pub fn expected_chain_index(nonce: u32, chain_id: i32, branch_len: usize) -> u32 {
    let mut rand = nonce;
    rand = rand.wrapping_mul(1103515245).wrapping_add(12345);
    rand = rand.wrapping_add(chain_id as u32);
    rand = rand.wrapping_mul(1103515245).wrapping_add(12345);
    rand % (1u32 << branch_len)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use crate::types::{AUXPOW_CHAIN_ID, OutPoint, TxIn, TxOut};

    fn parent_header(merkle_root: Hash256) -> ParentBlockHeader {
        ParentBlockHeader {
            version: 2,
            prev_hash: Hash256([1; 32]),
            merkle_root,
            time: 1000,
            bits: 0x1e0fffff,
            nonce: 0,
        }
    }

    /// Build a minimal valid auxpow over the given child block hash.
    fn build_auxpow(block_hash: Hash256) -> AuxPow {
        // Depth-zero auxiliary tree: root is the block hash itself.
        let mut root_reversed = *block_hash.as_bytes();
        root_reversed.reverse();

        let mut script_sig = Vec::new();
        script_sig.extend_from_slice(b"parent-extra-nonce");
        script_sig.extend_from_slice(&MERGED_MINING_HEADER);
        script_sig.extend_from_slice(&root_reversed);
        script_sig.extend_from_slice(&1u32.to_le_bytes()); // merkle size 2^0
        script_sig.extend_from_slice(&7u32.to_le_bytes()); // nonce

        let coinbase_tx = Transaction {
            version: 1,
            vin: vec![TxIn::new(OutPoint::null(), Script::from_bytes(script_sig))],
            vout: vec![TxOut { value: 0, script_pubkey: Script::new() }],
            lock_time: 0,
        };
        let coinbase_txid = coinbase_tx.txid();
        let parent = parent_header(coinbase_txid);
        AuxPow {
            parent_block_hash: parent.hash(),
            coinbase_tx,
            coinbase_branch: vec![],
            coinbase_index: 0,
            blockchain_branch: vec![],
            chain_index: expected_chain_index(7, AUXPOW_CHAIN_ID, 0),
            parent_header: parent,
        }
    }

    #[test]
    fn valid_auxpow_passes() {
        let block_hash = Hash256([0x33; 32]);
        let aux = build_auxpow(block_hash);
        aux.check(block_hash, AUXPOW_CHAIN_ID, PowAlgo::Sha256d).unwrap();
    }

    #[test]
    fn wrong_block_hash_fails() {
        let aux = build_auxpow(Hash256([0x33; 32]));
        assert!(aux.check(Hash256([0x34; 32]), AUXPOW_CHAIN_ID, PowAlgo::Sha256d).is_err());
    }

    #[test]
    fn parent_with_auxpow_bit_rejected() {
        let block_hash = Hash256([0x33; 32]);
        let mut aux = build_auxpow(block_hash);
        aux.parent_header.version |= BLOCK_VERSION_AUXPOW;
        assert!(aux.check(block_hash, AUXPOW_CHAIN_ID, PowAlgo::Sha256d).is_err());
    }

    #[test]
    fn same_chain_id_rejected() {
        let block_hash = Hash256([0x33; 32]);
        let mut aux = build_auxpow(block_hash);
        aux.parent_header.version = 2 + AUXPOW_CHAIN_ID * BLOCK_VERSION_CHAIN_START;
        // Recompute nothing else: the chain-id check fires first.
        assert!(aux.check(block_hash, AUXPOW_CHAIN_ID, PowAlgo::Sha256d).is_err());
    }

    #[test]
    fn algo_mismatch_rejected() {
        let block_hash = Hash256([0x33; 32]);
        let aux = build_auxpow(block_hash);
        assert!(aux.check(block_hash, AUXPOW_CHAIN_ID, PowAlgo::Scrypt).is_err());
    }

    #[test]
    fn tampered_coinbase_breaks_parent_root() {
        let block_hash = Hash256([0x33; 32]);
        let mut aux = build_auxpow(block_hash);
        aux.coinbase_tx.lock_time = 1;
        assert!(aux.check(block_hash, AUXPOW_CHAIN_ID, PowAlgo::Sha256d).is_err());
    }

    #[test]
    fn expected_index_is_stable() {
        let a = expected_chain_index(7, AUXPOW_CHAIN_ID, 4);
        let b = expected_chain_index(7, AUXPOW_CHAIN_ID, 4);
        assert_eq!(a, b);
        assert!(a < 16);
    }

    #[test]
    fn parent_header_hash_is_80_bytes_of_input() {
        let parent = parent_header(Hash256([2; 32]));
        assert_eq!(parent.prefix_bytes().len(), 80);
        assert_eq!(parent.hash(), sha256d(&parent.prefix_bytes()));
    }
}
