//! The consensus-extension seam.
//!
//! The chain machinery is decoupled from the game rules through
//! [`ConsensusExtension`]: every game- or name-specific decision the block
//! processor makes goes through this trait. Only one implementation
//! exists ([`HuntercoinRules`]), but the seam keeps the game logic
//! testable in isolation from storage and chain plumbing.

use std::collections::BTreeSet;

use hunter_core::constants::{
    get_block_value, Network, KEEP_EVERY_NTH_STATE, NAME_COIN_AMOUNT,
};
use hunter_core::error::{BlockError, TransactionError};
use hunter_core::genesis;
use hunter_core::merkle;
use hunter_core::script::{decode_name_script, NameOp};
use hunter_core::types::{Block, Hash256, Transaction, TxPos, UtxoEntry};

use hunter_game::moves::Move;
use hunter_game::state::GameState;
use hunter_game::step::{perform_step, StepData};

use crate::gametx;
use crate::namerules;
use crate::storage::ChainStorage;

/// Result of the game half of a block connect.
pub struct ConnectBlockOutcome {
    /// Kill and banking taxes, part of the coinbase allowance.
    pub tax: i64,
    pub new_state: GameState,
}

/// The operations the block processor delegates to the chain's rules.
#[allow(clippy::too_many_arguments)]
pub trait ConsensusExtension: Send + Sync {
    /// Context-free checks beyond the core ones (move syntax).
    fn check_transaction(&self, tx: &Transaction) -> Result<(), TransactionError>;

    /// Name-rule checks for a transaction with resolved inputs; writes the
    /// name index entry when `f_block`.
    fn connect_inputs(
        &self,
        storage: &mut dyn ChainStorage,
        tx: &Transaction,
        prev_entries: &[UtxoEntry],
        height: i32,
        pos: TxPos,
        f_block: bool,
        f_miner: bool,
        names_in_block: &mut BTreeSet<Vec<u8>>,
    ) -> Result<(), TransactionError>;

    /// Undo the name index entry of a disconnected transaction.
    fn disconnect_inputs(
        &self,
        storage: &mut dyn ChainStorage,
        tx: &Transaction,
        height: i32,
    ) -> Result<(), TransactionError>;

    /// Advance the game by one block: run the step, verify the committed
    /// game transactions, connect them, persist the snapshot when due.
    fn connect_block(
        &self,
        storage: &mut dyn ChainStorage,
        block: &Block,
        height: i32,
        prev_state: &GameState,
        moves: Vec<Move>,
    ) -> Result<ConnectBlockOutcome, BlockError>;

    /// Undo the game half of a block: disconnect its game transactions and
    /// drop the snapshot recorded at this height.
    fn disconnect_block(
        &self,
        storage: &mut dyn ChainStorage,
        block_height_of: &dyn Fn(&Hash256) -> Option<i32>,
        block: &Block,
        height: i32,
    ) -> Result<(), BlockError>;

    /// Game-side mempool admission: the carried move must apply to the
    /// current state and address operations must be authorised.
    fn accept_to_memory_pool(
        &self,
        current_state: &GameState,
        tx: &Transaction,
        input_addresses: &[String],
    ) -> Result<(), TransactionError>;

    /// Notification that a transaction left the pool.
    fn remove_from_memory_pool(&self, _tx: &Transaction) {}

    fn genesis_block(&self) -> &'static Block;

    /// Raise the base relay fee where the rules demand a mandatory fee.
    fn get_min_fee(&self, tx: &Transaction, base_fee: i64) -> i64;

    /// Whether the fees actually paid satisfy the mandatory minimum.
    fn check_fees(&self, tx: &Transaction, fees: i64) -> bool;

    fn message_start(&self) -> [u8; 4];
}

/// The name and value carried by a move transaction (firstupdate or
/// update; name_new commitments carry no move).
pub fn extract_move_value(tx: &Transaction) -> Option<(Vec<u8>, Vec<u8>)> {
    if !tx.is_name_tx() {
        return None;
    }
    for out in &tx.vout {
        if let Some(ns) = decode_name_script(&out.script_pubkey) {
            if matches!(ns.op, NameOp::FirstUpdate | NameOp::Update) {
                return Some((ns.name()?.to_vec(), ns.value()?.to_vec()));
            }
        }
    }
    None
}

/// Assemble the move list of a block, rejecting duplicate players and
/// unparseable values. Blocks replayed from disk pass through here too.
pub fn moves_from_block(block: &Block) -> Result<Vec<Move>, BlockError> {
    let mut moves = Vec::new();
    let mut seen = BTreeSet::new();
    for (i, tx) in block.vtx.iter().enumerate() {
        let Some((name, value)) = extract_move_value(tx) else { continue };
        if !seen.insert(name.clone()) {
            return Err(BlockError::DuplicateNameInBlock(
                String::from_utf8_lossy(&name).into_owned(),
            ));
        }
        let player = String::from_utf8(name).map_err(|_| BlockError::Tx {
            index: i,
            source: TransactionError::InvalidMove("name is not UTF-8".into()),
        })?;
        let m = Move::parse(&player, &value).ok_or(BlockError::Tx {
            index: i,
            source: TransactionError::InvalidMove(format!("unparseable move for {player}")),
        })?;
        moves.push(m);
    }
    Ok(moves)
}

/// The Huntercoin rule set.
pub struct HuntercoinRules {
    pub network: Network,
}

impl HuntercoinRules {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    fn name_update_fee(tx: &Transaction) -> Option<i64> {
        if !tx.is_name_tx() {
            return None;
        }
        for out in &tx.vout {
            if let Some(ns) = decode_name_script(&out.script_pubkey) {
                if matches!(ns.op, NameOp::Update) {
                    let len = ns.value().map(|v| v.len()).unwrap_or(0) as i64;
                    return Some(
                        hunter_core::constants::NAME_UPDATE_MIN_FEE
                            + hunter_core::constants::NAME_UPDATE_LEN_FEE * (len / 100),
                    );
                }
            }
        }
        None
    }
}

impl ConsensusExtension for HuntercoinRules {
    fn check_transaction(&self, tx: &Transaction) -> Result<(), TransactionError> {
        let Some((name, value)) = extract_move_value(tx) else {
            return Ok(());
        };
        let player = String::from_utf8(name)
            .map_err(|_| TransactionError::InvalidMove("name is not UTF-8".into()))?;
        if Move::parse(&player, &value).is_none() {
            return Err(TransactionError::InvalidMove(format!(
                "unparseable move for {player}",
            )));
        }
        Ok(())
    }

    fn connect_inputs(
        &self,
        storage: &mut dyn ChainStorage,
        tx: &Transaction,
        prev_entries: &[UtxoEntry],
        height: i32,
        pos: TxPos,
        f_block: bool,
        f_miner: bool,
        names_in_block: &mut BTreeSet<Vec<u8>>,
    ) -> Result<(), TransactionError> {
        namerules::connect_name_inputs(
            storage,
            self.network,
            tx,
            prev_entries,
            height,
            pos,
            f_block,
            f_miner,
            names_in_block,
        )
    }

    fn disconnect_inputs(
        &self,
        storage: &mut dyn ChainStorage,
        tx: &Transaction,
        height: i32,
    ) -> Result<(), TransactionError> {
        namerules::disconnect_name_inputs(storage, tx, height)
    }

    fn connect_block(
        &self,
        storage: &mut dyn ChainStorage,
        block: &Block,
        height: i32,
        prev_state: &GameState,
        moves: Vec<Move>,
    ) -> Result<ConnectBlockOutcome, BlockError> {
        let step_data = StepData {
            name_coin_amount: NAME_COIN_AMOUNT,
            // The miner keeps the subsidy; the game scatters nine times it.
            treasure_amount: 9 * get_block_value(height, 0),
            new_hash: block.hash(),
            moves,
        };
        let (new_state, result) = perform_step(prev_state, &step_data)
            .map_err(|e| BlockError::GameStep(e.to_string()))?;

        let derived =
            gametx::create_game_transactions(storage, prev_state, &new_state, &result)?;
        let derived_root = merkle::tx_merkle_root(&derived);
        if derived_root != block.header.game_merkle_root {
            return Err(BlockError::BadGameMerkleRoot);
        }
        if derived != block.vgametx {
            return Err(BlockError::BadGameMerkleRoot);
        }

        for (i, tx) in block.vgametx.iter().enumerate() {
            let pos = TxPos {
                txid: tx.txid(),
                block_hash: block.hash(),
                tx_index: (block.vtx.len() + i) as u32,
            };
            gametx::connect_game_tx(storage, tx, height, pos)?;
        }

        if height % KEEP_EVERY_NTH_STATE == 0 {
            storage
                .write_game_state(height, &new_state)
                .map_err(|e| BlockError::GameStep(e.to_string()))?;
        }

        Ok(ConnectBlockOutcome { tax: result.tax_amount, new_state })
    }

    fn disconnect_block(
        &self,
        storage: &mut dyn ChainStorage,
        block_height_of: &dyn Fn(&Hash256) -> Option<i32>,
        block: &Block,
        height: i32,
    ) -> Result<(), BlockError> {
        for tx in block.vgametx.iter().rev() {
            gametx::disconnect_game_tx(storage, block_height_of, tx, height)?;
        }
        if height % KEEP_EVERY_NTH_STATE == 0 {
            storage
                .erase_game_state(height)
                .map_err(|e| BlockError::GameStep(e.to_string()))?;
        }
        Ok(())
    }

    fn accept_to_memory_pool(
        &self,
        current_state: &GameState,
        tx: &Transaction,
        input_addresses: &[String],
    ) -> Result<(), TransactionError> {
        let Some((name, value)) = extract_move_value(tx) else {
            return Ok(());
        };
        let player = String::from_utf8(name)
            .map_err(|_| TransactionError::InvalidMove("name is not UTF-8".into()))?;
        let m = Move::parse(&player, &value).ok_or_else(|| {
            TransactionError::InvalidMove(format!("unparseable move for {player}"))
        })?;
        if !m.is_valid(current_state) {
            return Err(TransactionError::InvalidMove(format!(
                "move not applicable for {player}",
            )));
        }
        if let Some(lock) = m.address_operation_permission(current_state) {
            // One of the spent outputs must belong to the lock address:
            // that input's signature then authorises the operation.
            if !input_addresses.iter().any(|a| *a == lock) {
                return Err(TransactionError::InvalidMove(format!(
                    "address operation for {player} not signed by lock holder",
                )));
            }
        }
        Ok(())
    }

    fn genesis_block(&self) -> &'static Block {
        genesis::genesis_block(self.network)
    }

    fn get_min_fee(&self, tx: &Transaction, base_fee: i64) -> i64 {
        match Self::name_update_fee(tx) {
            Some(fee) => base_fee.max(fee),
            None => base_fee,
        }
    }

    fn check_fees(&self, tx: &Transaction, fees: i64) -> bool {
        match Self::name_update_fee(tx) {
            Some(required) => fees >= required,
            None => true,
        }
    }

    fn message_start(&self) -> [u8; 4] {
        self.network.message_start()
    }
}
