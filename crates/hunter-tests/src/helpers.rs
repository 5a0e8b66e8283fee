//! Test harness: a regtest chain that mines real blocks.
//!
//! Regtest proof of work accepts roughly every other hash, so blocks are
//! mined by incrementing the nonce a handful of times. All blocks go
//! through the full template → mine → accept pipeline, exercising exactly
//! the validation a production node performs.

use hunter_core::constants::{Network, NAMECOIN_TX_VERSION, NAME_COIN_AMOUNT};
use hunter_core::error::HunterError;
use hunter_core::keys::KeyPair;
use hunter_core::pow::check_proof_of_work;
use hunter_core::merkle;
use hunter_core::script::{self, Script, SIGHASH_ALL};
use hunter_core::types::{Block, Hash256, OutPoint, Transaction, TxIn, TxOut};

use hunter_consensus::engine::{AcceptOutcome, ChainContext};
use hunter_consensus::storage::{ChainStorage, MemoryChainStorage};

/// Grind the nonce until the header satisfies regtest PoW.
pub fn mine(block: &mut Block) {
    while check_proof_of_work(&block.header, Network::Regtest).is_err() {
        block.header.nonce = block.header.nonce.wrapping_add(1);
    }
}

/// Recompute both merkle roots after editing a block's transactions, then
/// re-mine it. For building intentionally odd blocks by hand.
pub fn rebuild_and_mine(block: &mut Block) {
    let txids: Vec<Hash256> = block.vtx.iter().map(|tx| tx.txid()).collect();
    block.header.tx_merkle_root = merkle::merkle_root(&txids);
    block.header.game_merkle_root = merkle::tx_merkle_root(&block.vgametx);
    mine(block);
}

/// A regtest chain with a deterministic miner key.
pub struct TestChain {
    pub ctx: ChainContext<MemoryChainStorage>,
    pub time: u32,
    pub kp: KeyPair,
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TestChain {
    pub fn new() -> Self {
        let ctx = ChainContext::new(MemoryChainStorage::new(), Network::Regtest)
            .expect("regtest bootstrap");
        let time = hunter_core::genesis::genesis_block(Network::Regtest).header.time;
        let kp = KeyPair::from_secret_bytes([0x42; 32]).expect("fixed test key");
        Self { ctx, time, kp }
    }

    /// The miner/test destination.
    pub fn dest(&self) -> [u8; 20] {
        self.kp.public_key().pubkey_hash()
    }

    pub fn height(&self) -> i32 {
        self.ctx.best_height()
    }

    /// Build a template over the tip including `txs`, mine it, submit it.
    pub fn mine_block_with(&mut self, txs: &[Transaction]) -> Result<Block, HunterError> {
        self.time += 60;
        let dest = self.dest();
        let mut block = self.ctx.create_block_template(txs, &dest, self.time)?;
        mine(&mut block);
        let outcome = self.ctx.accept_block(block.clone(), self.time)?;
        assert!(
            matches!(
                outcome,
                AcceptOutcome::Connected { .. } | AcceptOutcome::Reorganized(_),
            ),
            "mined block must advance the chain, got {outcome:?}",
        );
        Ok(block)
    }

    /// Mine `n` empty blocks.
    pub fn mine_empty(&mut self, n: usize) {
        for _ in 0..n {
            self.mine_block_with(&[]).expect("empty block connects");
        }
    }

    /// Submit an externally built block without asserting the outcome.
    pub fn submit(&mut self, block: Block) -> Result<AcceptOutcome, HunterError> {
        self.time += 60;
        self.ctx.accept_block(block, self.time)
    }

    /// The coinbase outpoint of the best-chain block at `height`.
    pub fn coinbase_outpoint(&self, height: i32) -> OutPoint {
        let id = self.ctx.index.find_by_height(height).expect("height on best chain");
        let hash = self.ctx.index.get(id).hash;
        let block = self
            .ctx
            .storage
            .read_block(&hash)
            .unwrap()
            .expect("best-chain block stored");
        OutPoint::new(block.vtx[0].txid(), 0)
    }

    /// Value of an unspent output.
    pub fn utxo_value(&self, outpoint: &OutPoint) -> i64 {
        self.ctx
            .storage
            .read_utxo(outpoint)
            .unwrap()
            .expect("utxo exists")
            .txo
            .value
    }

    /// Build and sign a transaction spending the given outpoints (all
    /// owned by the test key) into the given outputs.
    pub fn signed_tx(
        &self,
        version: i32,
        inputs: &[OutPoint],
        outputs: Vec<TxOut>,
    ) -> Transaction {
        let mut tx = Transaction {
            version,
            vin: inputs.iter().map(|op| TxIn::new(*op, Script::new())).collect(),
            vout: outputs,
            lock_time: 0,
        };
        for i in 0..tx.vin.len() {
            let prev = self
                .ctx
                .storage
                .read_utxo(&tx.vin[i].prevout)
                .unwrap()
                .expect("signing against an unspent output");
            let digest =
                script::signature_hash(&prev.txo.script_pubkey, &tx, i, SIGHASH_ALL);
            let mut sig = self.kp.sign(&digest);
            sig.push(SIGHASH_ALL as u8);
            let mut script_sig = Script::new();
            script_sig.push_data(&sig).push_data(&self.kp.public_key().to_bytes());
            tx.vin[i].script_sig = script_sig;
        }
        tx
    }

    /// A direct name registration funded from `funding`, change back to
    /// the test key.
    pub fn name_register_tx(
        &self,
        name: &[u8],
        value: &[u8],
        funding: OutPoint,
    ) -> Transaction {
        let funds = self.utxo_value(&funding);
        self.signed_tx(
            NAMECOIN_TX_VERSION,
            &[funding],
            vec![
                TxOut {
                    value: NAME_COIN_AMOUNT,
                    script_pubkey: script::name_firstupdate_script(name, value, &self.dest()),
                },
                TxOut {
                    value: funds - NAME_COIN_AMOUNT,
                    script_pubkey: script::p2pkh_script(&self.dest()),
                },
            ],
        )
    }

    /// A move (name_update) spending the current name output.
    pub fn name_update_tx(&self, name: &[u8], value: &[u8]) -> Transaction {
        let entry = self
            .ctx
            .storage
            .name_read(name)
            .unwrap()
            .expect("name registered");
        let (prev_tx, _) = self
            .ctx
            .storage
            .read_tx(&entry.tx_pos.txid)
            .unwrap()
            .expect("name tx indexed");
        let n_out = hunter_core::validation::index_of_name_output(&prev_tx).unwrap();
        let locked = prev_tx.vout[n_out].value;
        self.signed_tx(
            NAMECOIN_TX_VERSION,
            &[OutPoint::new(entry.tx_pos.txid, n_out as u32)],
            vec![TxOut {
                value: locked,
                script_pubkey: script::name_update_script(name, value, &self.dest()),
            }],
        )
    }

    /// Mine past coinbase maturity so the test key has spendable funds,
    /// returning a mature coinbase outpoint.
    pub fn fund(&mut self) -> OutPoint {
        // Coinbase of block 1 matures at height 101.
        if self.height() < 1 {
            self.mine_empty(1);
        }
        let outpoint = self.coinbase_outpoint(1);
        while self.height() < 101 {
            self.mine_empty(1);
        }
        outpoint
    }

    /// Register a player and mine the registration, returning the block.
    pub fn register_player(&mut self, name: &str) -> Block {
        let funding = self.fund();
        let tx = self.name_register_tx(name.as_bytes(), b"{\"color\":0}", funding);
        let block = self.mine_block_with(&[tx.clone()]).expect("registration connects");
        assert!(
            block.vtx.iter().any(|t| t.txid() == tx.txid()),
            "registration must be included",
        );
        block
    }

    /// The test player's general coordinate.
    pub fn player_coord(&self, name: &str) -> (i16, i16) {
        let state = self.ctx.current_game_state();
        let c = state.players[name].general().expect("general alive").coord;
        (c.x, c.y)
    }
}

/// A simple payment output to the given destination.
pub fn payment(dest: &[u8; 20], value: i64) -> TxOut {
    TxOut { value, script_pubkey: script::p2pkh_script(dest) }
}
