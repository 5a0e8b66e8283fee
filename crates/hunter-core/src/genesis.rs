//! Genesis block construction.
//!
//! The genesis block is built field-by-field from the historic values: the
//! newspaper-style timestamp text in the coinbase scriptSig, the premine
//! output, and the original time/nonce pair. Every node computes the
//! identical block; its hash is pinned by [`genesis_hash`] and the block is
//! trusted by identity rather than by proof-of-work.

use std::sync::LazyLock;

use crate::address;
use crate::constants::{Network, COIN, PREMINE_AMOUNT};
use crate::merkle;
use crate::pow::{pow_limit, target_to_compact};
use crate::script::{p2pkh_script, Script};
use crate::types::{
    Block, BlockHeader, Hash256, OutPoint, PowAlgo, Transaction, TxIn, TxOut,
};

/// Mainnet genesis timestamp text, anchoring the launch to the Bitcoin and
/// Litecoin chains of 31 January 2014.
const GENESIS_TIMESTAMP_TEXT: &str = "\n\
Huntercoin genesis timestamp\n\
31/Jan/2014 20:10 GMT\n\
Bitcoin block 283440: 0000000000000001795d3c369b0746c0b5d315a6739a7410ada886de5d71ca86\n\
Litecoin block 506479: 77c49384e6e8dd322da0ebb32ca6c8f047d515d355e9f22b116430a888fffd38\n";

const TESTNET_TIMESTAMP_TEXT: &str = "\nHuntercoin test net\n";

/// Address receiving the mainnet premine.
pub const MAINNET_PREMINE_ADDRESS: &str = "HVguPy1tWgbu9cKy6YGYEJFJ6RD7z7F7MJ";
const TESTNET_PREMINE_ADDRESS: &str = "hRDGZuirWznh25mqZM5bKmeEAcw7dmDwUx";

pub const MAINNET_GENESIS_TIME: u32 = 1_391_199_780;
pub const MAINNET_GENESIS_NONCE: u32 = 1_906_435_634;
const TESTNET_GENESIS_TIME: u32 = 1_391_193_136;
const TESTNET_GENESIS_NONCE: u32 = 1_997_599_826;

static MAINNET_GENESIS: LazyLock<Block> = LazyLock::new(|| build_genesis(Network::Mainnet));
static TESTNET_GENESIS: LazyLock<Block> = LazyLock::new(|| build_genesis(Network::Testnet));
static REGTEST_GENESIS: LazyLock<Block> = LazyLock::new(|| build_genesis(Network::Regtest));

fn build_genesis(network: Network) -> Block {
    let (text, premine_addr, value, time, nonce) = match network {
        Network::Mainnet => (
            GENESIS_TIMESTAMP_TEXT,
            MAINNET_PREMINE_ADDRESS,
            PREMINE_AMOUNT,
            MAINNET_GENESIS_TIME,
            MAINNET_GENESIS_NONCE,
        ),
        Network::Testnet | Network::Regtest => (
            TESTNET_TIMESTAMP_TEXT,
            TESTNET_PREMINE_ADDRESS,
            100 * COIN,
            TESTNET_GENESIS_TIME,
            TESTNET_GENESIS_NONCE,
        ),
    };

    let mut script_sig = Script::new();
    script_sig.push_data(text.as_bytes());

    // The premine address decodes on its own network; its version byte is
    // irrelevant to the script.
    let hash = address::decode_address(premine_addr)
        .expect("genesis address is hardcoded valid")
        .1;

    let coinbase = Transaction {
        version: 1,
        vin: vec![TxIn::new(OutPoint::null(), script_sig)],
        vout: vec![TxOut { value, script_pubkey: p2pkh_script(&hash) }],
        lock_time: 0,
    };
    let tx_merkle_root = merkle::merkle_root(&[coinbase.txid()]);

    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            tx_merkle_root,
            game_merkle_root: Hash256::ZERO,
            time,
            bits: target_to_compact(pow_limit(network, PowAlgo::Sha256d)),
            nonce,
            aux_pow: None,
        },
        vtx: vec![coinbase],
        vgametx: vec![],
    }
}

/// The genesis block for a network.
pub fn genesis_block(network: Network) -> &'static Block {
    match network {
        Network::Mainnet => &MAINNET_GENESIS,
        Network::Testnet => &TESTNET_GENESIS,
        Network::Regtest => &REGTEST_GENESIS,
    }
}

/// The pinned genesis hash for a network.
pub fn genesis_hash(network: Network) -> Hash256 {
    genesis_block(network).hash()
}

/// Whether a block is the genesis block of the given network.
pub fn is_genesis(block: &Block, network: Network) -> bool {
    block.hash() == genesis_hash(network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_genesis_structure() {
        let block = genesis_block(Network::Mainnet);
        assert_eq!(block.vtx.len(), 1);
        assert!(block.vgametx.is_empty());
        let coinbase = &block.vtx[0];
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.vout[0].value, PREMINE_AMOUNT);
        assert_eq!(block.header.time, MAINNET_GENESIS_TIME);
        assert_eq!(block.header.nonce, MAINNET_GENESIS_NONCE);
        assert!(block.header.prev_hash.is_zero());
        assert!(block.header.game_merkle_root.is_zero());
    }

    #[test]
    fn merkle_root_commits_to_coinbase() {
        let block = genesis_block(Network::Mainnet);
        assert_eq!(
            block.header.tx_merkle_root,
            merkle::merkle_root(&[block.vtx[0].txid()]),
        );
    }

    #[test]
    fn genesis_hash_is_stable() {
        assert_eq!(genesis_hash(Network::Mainnet), genesis_hash(Network::Mainnet));
        assert_ne!(genesis_hash(Network::Mainnet), genesis_hash(Network::Testnet));
    }

    #[test]
    fn testnet_premine_is_small() {
        let block = genesis_block(Network::Testnet);
        assert_eq!(block.vtx[0].vout[0].value, 100 * COIN);
    }

    #[test]
    fn is_genesis_only_matches_own_network() {
        let main = genesis_block(Network::Mainnet);
        assert!(is_genesis(main, Network::Mainnet));
        assert!(!is_genesis(main, Network::Testnet));
    }

    #[test]
    fn genesis_roundtrips_through_wire_codec() {
        let block = genesis_block(Network::Mainnet);
        let decoded: Block =
            crate::ser::deserialize(&crate::ser::serialize(block)).unwrap();
        assert_eq!(&decoded, block);
    }
}
