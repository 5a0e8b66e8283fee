//! The block processor.
//!
//! [`ChainContext`] owns the storage facade, the header index, and the
//! consensus extension, and is the single writer of chain state. A block
//! travels: context-free checks → contextual header checks → connect
//! (inputs, name rules, game step, game transactions, coinbase bound) —
//! or a reorganisation when a side branch overtakes the best chain. Every
//! connect, disconnect, and whole reorg runs inside one storage
//! transaction; a failure aborts it and the branch is remembered as
//! invalid work.

use std::collections::{BTreeSet, HashMap};

use primitive_types::U256;
use tracing::{debug, info, warn};

use hunter_core::constants::{
    get_block_value, Network, MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE, MAX_FUTURE_BLOCK_TIME,
    NAME_COIN_AMOUNT,
};
use hunter_core::error::{BlockError, ChainError, HunterError, TransactionError};
use hunter_core::merkle;
use hunter_core::pow::{check_proof_of_work, next_work_required};
use hunter_core::script::{extract_destination, p2pkh_script, Script};
use hunter_core::address::hash160_to_address;
use hunter_core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxIn, TxOut, TxPos, UtxoEntry,
    AUXPOW_CHAIN_ID,
};
use hunter_core::validation::{self, tx_sig_op_count};

use hunter_game::moves::Move;
use hunter_game::state::GameState;
use hunter_game::step::{perform_step, StepData};

use crate::chain::{BlockIndexId, ChainIndex};
use crate::gametx;
use crate::hooks::{
    extract_move_value, moves_from_block, ConsensusExtension, HuntercoinRules,
};
use crate::storage::ChainStorage;

/// What became of a submitted block.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// Already in the index; nothing to do.
    AlreadyKnown,
    /// Stored and indexed, but not on the best chain.
    SideChain,
    /// Extended the best chain.
    Connected { height: i32, hash: Hash256 },
    /// Overtook the best chain from a fork.
    Reorganized(ReorgSummary),
}

#[derive(Debug)]
pub struct ReorgSummary {
    pub tip: Hash256,
    pub disconnected: usize,
    pub connected: usize,
    /// Transactions of the abandoned branch to offer back to the mempool.
    pub resurrected: Vec<Transaction>,
}

/// The single-writer chain state: storage, header index, game state at
/// the tip, and the rule set.
pub struct ChainContext<S: ChainStorage> {
    pub network: Network,
    pub storage: S,
    pub index: ChainIndex,
    pub rules: HuntercoinRules,
    /// Greatest cumulative work of any branch that failed to connect.
    pub best_invalid_work: U256,
    current_state: GameState,
}

impl<S: ChainStorage> ChainContext<S> {
    /// Open a context over existing storage, rebuilding the header index
    /// and connecting the genesis block on first run.
    pub fn new(storage: S, network: Network) -> Result<Self, HunterError> {
        let mut ctx = Self {
            network,
            storage,
            index: ChainIndex::new(),
            rules: HuntercoinRules::new(network),
            best_invalid_work: U256::zero(),
            current_state: GameState::new(),
        };

        ctx.rebuild_index()?;

        match ctx.storage.best_hash().map_err(HunterError::Chain)? {
            None => ctx.connect_genesis()?,
            Some(best) => {
                let id = ctx
                    .index
                    .lookup(&best)
                    .ok_or_else(|| ChainError::BlockNotFound(best.to_string()))?;
                ctx.index.set_best(id);
                let height = ctx.index.get(id).height;
                ctx.current_state = ctx.game_state_at(height)?;
                info!(height, %best, "chain loaded");
            }
        }
        Ok(ctx)
    }

    fn rebuild_index(&mut self) -> Result<(), HunterError> {
        let blocks = self.storage.all_blocks().map_err(HunterError::Chain)?;
        let mut pending: Vec<BlockHeader> =
            blocks.into_iter().map(|b| b.header).collect();
        // Topological insertion: keep making passes while progress lasts.
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|header| {
                let insertable =
                    header.prev_hash.is_zero() || self.index.contains(&header.prev_hash);
                if insertable {
                    let _ = self.index.insert(header);
                }
                !insertable
            });
            if pending.len() == before {
                warn!(orphans = pending.len(), "ignoring stored orphan blocks");
                break;
            }
        }
        Ok(())
    }

    fn connect_genesis(&mut self) -> Result<(), HunterError> {
        let genesis = self.rules.genesis_block().clone();
        self.storage.write_block(&genesis).map_err(HunterError::Chain)?;
        let id = self.index.insert(&genesis.header).map_err(HunterError::Block)?;

        self.storage.begin();
        let prev_state = GameState::new();
        match self.connect_block_inner(&genesis, 0, &prev_state) {
            Ok((_, outcome)) => {
                self.storage.commit().map_err(HunterError::Chain)?;
                self.index.set_best(id);
                self.current_state = outcome.new_state;
                info!(hash = %genesis.hash(), "genesis connected");
                Ok(())
            }
            Err(e) => {
                self.storage.abort();
                Err(e)
            }
        }
    }

    pub fn best_hash(&self) -> Option<Hash256> {
        self.index.best().map(|id| self.index.get(id).hash)
    }

    pub fn best_height(&self) -> i32 {
        self.index.best_height()
    }

    /// The game state at the current tip.
    pub fn current_game_state(&self) -> &GameState {
        &self.current_state
    }

    /// Context-free block checks (§ "CheckBlock").
    pub fn check_block(&self, block: &Block) -> Result<(), BlockError> {
        if block.vtx.is_empty() {
            return Err(BlockError::Empty);
        }
        let size = hunter_core::ser::serialize(block).len();
        if size > MAX_BLOCK_SIZE {
            return Err(BlockError::Oversized { size, max: MAX_BLOCK_SIZE });
        }
        if !block.vtx[0].is_coinbase() {
            return Err(BlockError::FirstTxNotCoinbase);
        }

        let mut sig_ops = 0usize;
        for (i, tx) in block.vtx.iter().enumerate() {
            if i > 0 && tx.is_coinbase() {
                return Err(BlockError::MultipleCoinbase);
            }
            validation::check_transaction(tx)
                .map_err(|source| BlockError::Tx { index: i, source })?;
            self.rules
                .check_transaction(tx)
                .map_err(|source| BlockError::Tx { index: i, source })?;
            sig_ops += tx_sig_op_count(tx);
        }
        if sig_ops > MAX_BLOCK_SIGOPS {
            return Err(BlockError::SigOpsExceeded(sig_ops));
        }

        for tx in &block.vgametx {
            if !tx.is_game_tx() {
                return Err(BlockError::GameStep("non-game tx in vgametx".into()));
            }
        }

        let mut seen = BTreeSet::new();
        for tx in block.vtx.iter().chain(block.vgametx.iter()) {
            if !seen.insert(tx.txid()) {
                return Err(BlockError::DuplicateTxid(tx.txid().to_string()));
            }
        }

        let txids: Vec<Hash256> = block.vtx.iter().map(|tx| tx.txid()).collect();
        if merkle::merkle_root(&txids) != block.header.tx_merkle_root {
            return Err(BlockError::BadMerkleRoot);
        }

        let header = &block.header;
        match (&header.aux_pow, header.has_auxpow_bit()) {
            (Some(aux), true) => {
                if header.chain_id() != AUXPOW_CHAIN_ID {
                    return Err(BlockError::BadAuxPow("wrong chain id".into()));
                }
                aux.check(block.hash(), AUXPOW_CHAIN_ID, header.algo())?;
            }
            (None, false) => {}
            _ => return Err(BlockError::AuxPowMismatch),
        }
        check_proof_of_work(header, self.network)?;

        Ok(())
    }

    /// Process a new block: validate, store, and adopt it if it wins.
    pub fn accept_block(&mut self, block: Block, now: u32) -> Result<AcceptOutcome, HunterError> {
        let hash = block.hash();
        if self.index.contains(&hash) {
            return Ok(AcceptOutcome::AlreadyKnown);
        }

        self.check_block(&block).map_err(HunterError::Block)?;

        let parent_id = self
            .index
            .lookup(&block.header.prev_hash)
            .ok_or_else(|| BlockError::UnknownParent(block.header.prev_hash.to_string()))
            .map_err(HunterError::Block)?;
        let height = self.index.get(parent_id).height + 1;

        let expected_bits = next_work_required(
            self.network,
            block.header.algo(),
            self.index.algo_ancestors(parent_id, block.header.algo()),
        );
        if block.header.bits != expected_bits {
            return Err(BlockError::BadBits {
                got: block.header.bits,
                expected: expected_bits,
            }
            .into());
        }

        if block.header.time <= self.index.median_time_past(parent_id) {
            return Err(BlockError::TimestampTooEarly.into());
        }
        if block.header.time > now.saturating_add(MAX_FUTURE_BLOCK_TIME) {
            return Err(BlockError::TimestampTooFar.into());
        }

        self.storage.write_block(&block).map_err(HunterError::Chain)?;
        let id = self.index.insert(&block.header).map_err(HunterError::Block)?;

        let work = self.index.get(id).chain_work;
        if work <= self.index.best_work() {
            debug!(height, %hash, "side-chain block stored");
            return Ok(AcceptOutcome::SideChain);
        }

        if Some(parent_id) == self.index.best() {
            self.connect_tip(&block, height, id)?;
            info!(height, %hash, "block connected");
            Ok(AcceptOutcome::Connected { height, hash })
        } else {
            let summary = self.reorganize(id)?;
            info!(
                tip = %summary.tip,
                disconnected = summary.disconnected,
                connected = summary.connected,
                "chain reorganized",
            );
            Ok(AcceptOutcome::Reorganized(summary))
        }
    }

    fn connect_tip(
        &mut self,
        block: &Block,
        height: i32,
        id: BlockIndexId,
    ) -> Result<(), HunterError> {
        self.storage.begin();
        let prev_state = self.current_state.clone();
        match self.connect_block_inner(block, height, &prev_state) {
            Ok((_, outcome)) => {
                self.storage.commit().map_err(HunterError::Chain)?;
                self.index.set_best(id);
                self.current_state = outcome.new_state;
                Ok(())
            }
            Err(e) => {
                self.storage.abort();
                self.mark_invalid(id);
                Err(e)
            }
        }
    }

    fn mark_invalid(&mut self, id: BlockIndexId) {
        let work = self.index.get(id).chain_work;
        if work > self.best_invalid_work {
            self.best_invalid_work = work;
            warn!(hash = %self.index.get(id).hash, "branch marked invalid");
        }
    }

    /// Connect one block's transactions and game step. Caller brackets the
    /// storage transaction and updates the index on success.
    fn connect_block_inner(
        &mut self,
        block: &Block,
        height: i32,
        prev_state: &GameState,
    ) -> Result<(i64, crate::hooks::ConnectBlockOutcome), HunterError> {
        let block_hash = block.hash();
        let mut names_in_block: BTreeSet<Vec<u8>> = BTreeSet::new();
        let mut fees: i64 = 0;

        for (i, tx) in block.vtx.iter().enumerate() {
            let txid = tx.txid();
            let pos = TxPos { txid, block_hash, tx_index: i as u32 };

            if !tx.is_coinbase() {
                let prev_entries = self.resolve_inputs(tx, i)?;
                let view: HashMap<OutPoint, UtxoEntry> = tx
                    .vin
                    .iter()
                    .map(|input| input.prevout)
                    .zip(prev_entries.iter().cloned())
                    .collect();

                let flow = validation::connect_inputs(
                    tx,
                    |op| view.get(op).cloned(),
                    height,
                    true,
                )
                .map_err(|source| BlockError::Tx { index: i, source })
                .map_err(HunterError::Block)?;

                self.rules
                    .connect_inputs(
                        &mut self.storage,
                        tx,
                        &prev_entries,
                        height,
                        pos,
                        true,
                        false,
                        &mut names_in_block,
                    )
                    .map_err(|source| BlockError::Tx { index: i, source })
                    .map_err(HunterError::Block)?;

                self.check_move_permission(tx, prev_state, &prev_entries)
                    .map_err(|source| BlockError::Tx { index: i, source })
                    .map_err(HunterError::Block)?;

                for input in &tx.vin {
                    self.storage
                        .remove_utxo(&input.prevout)
                        .map_err(HunterError::Chain)?;
                }
                fees += flow.fee;
            }

            self.storage
                .insert_tx_outputs(tx, height)
                .map_err(HunterError::Chain)?;
            self.storage
                .write_tx_index(&txid, pos)
                .map_err(HunterError::Chain)?;
        }

        let moves = moves_from_block(block).map_err(HunterError::Block)?;
        let outcome = self
            .rules
            .connect_block(&mut self.storage, block, height, prev_state, moves)
            .map_err(HunterError::Block)?;

        // The genesis coinbase carries the premine, not a subsidy.
        if height > 0 {
            let coinbase_value = block.vtx[0]
                .total_output_value()
                .ok_or(BlockError::Tx {
                    index: 0,
                    source: TransactionError::ValueOverflow,
                })
                .map_err(HunterError::Block)?;
            let max = get_block_value(height, fees + outcome.tax);
            if coinbase_value > max {
                return Err(BlockError::BadCoinbaseValue {
                    got: coinbase_value,
                    max,
                }
                .into());
            }
        }

        self.storage
            .set_best_hash(&block_hash)
            .map_err(HunterError::Chain)?;
        Ok((fees, outcome))
    }

    fn resolve_inputs(
        &self,
        tx: &Transaction,
        index: usize,
    ) -> Result<Vec<UtxoEntry>, HunterError> {
        let mut entries = Vec::with_capacity(tx.vin.len());
        for input in &tx.vin {
            let entry = self
                .storage
                .read_utxo(&input.prevout)
                .map_err(HunterError::Chain)?
                .ok_or_else(|| BlockError::Tx {
                    index,
                    source: TransactionError::MissingInputs(input.prevout.to_string()),
                })
                .map_err(HunterError::Block)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Address operations on a locked player must be signed by the lock
    /// holder: one of the spent outputs must pay the lock address.
    fn check_move_permission(
        &self,
        tx: &Transaction,
        prev_state: &GameState,
        prev_entries: &[UtxoEntry],
    ) -> Result<(), TransactionError> {
        let Some((name, value)) = extract_move_value(tx) else {
            return Ok(());
        };
        let player = String::from_utf8_lossy(&name).into_owned();
        let Some(m) = Move::parse(&player, &value) else {
            return Err(TransactionError::InvalidMove(format!(
                "unparseable move for {player}",
            )));
        };
        let Some(lock) = m.address_operation_permission(prev_state) else {
            return Ok(());
        };
        let authorised = prev_entries.iter().any(|entry| {
            extract_destination(&entry.txo.script_pubkey)
                .map(|hash| hash160_to_address(self.network, &hash) == lock)
                .unwrap_or(false)
        });
        if authorised {
            Ok(())
        } else {
            Err(TransactionError::InvalidMove(format!(
                "address operation for {player} not signed by lock holder",
            )))
        }
    }

    /// Undo one block, returning its mempool-worthy transactions.
    fn disconnect_block_inner(
        &mut self,
        block: &Block,
        height: i32,
    ) -> Result<Vec<Transaction>, HunterError> {
        let index = &self.index;
        let height_of =
            |hash: &Hash256| index.lookup(hash).map(|id| index.get(id).height);

        self.rules
            .disconnect_block(&mut self.storage, &height_of, block, height)
            .map_err(HunterError::Block)?;

        let mut resurrected = Vec::new();
        for tx in block.vtx.iter().rev() {
            self.storage
                .remove_tx_outputs(tx)
                .map_err(HunterError::Chain)?;
            self.storage
                .erase_tx_index(&tx.txid())
                .map_err(HunterError::Chain)?;

            if tx.is_coinbase() {
                continue;
            }

            self.rules
                .disconnect_inputs(&mut self.storage, tx, height)
                .map_err(|source| BlockError::Tx { index: 0, source })
                .map_err(HunterError::Block)?;

            for input in tx.vin.iter().rev() {
                let (prev_tx, prev_pos) = self
                    .storage
                    .read_tx(&input.prevout.txid)
                    .map_err(HunterError::Chain)?
                    .ok_or_else(|| {
                        ChainError::TxNotFound(input.prevout.txid.to_string())
                    })
                    .map_err(HunterError::Chain)?;
                let prev_height = height_of(&prev_pos.block_hash).ok_or_else(|| {
                    ChainError::BlockNotFound(prev_pos.block_hash.to_string())
                })?;
                let txo = prev_tx
                    .vout
                    .get(input.prevout.n as usize)
                    .cloned()
                    .ok_or_else(|| {
                        ChainError::Storage("prevout index out of range".into())
                    })?;
                self.storage
                    .insert_utxo(
                        input.prevout,
                        UtxoEntry {
                            txo,
                            height: prev_height,
                            is_coinbase: prev_tx.is_coinbase(),
                            is_game_tx: prev_tx.is_game_tx(),
                        },
                    )
                    .map_err(HunterError::Chain)?;
            }

            resurrected.push(tx.clone());
        }

        self.storage
            .set_best_hash(&block.header.prev_hash)
            .map_err(HunterError::Chain)?;
        Ok(resurrected)
    }

    /// Switch the best chain to `new_tip`: disconnect to the common
    /// ancestor, then connect the new branch, all in one transaction.
    fn reorganize(&mut self, new_tip: BlockIndexId) -> Result<ReorgSummary, HunterError> {
        let old_tip = self
            .index
            .best()
            .ok_or_else(|| ChainError::Storage("reorg without a best chain".into()))?;
        let ancestor = self
            .index
            .common_ancestor(old_tip, new_tip)
            .ok_or_else(|| {
                ChainError::NoCommonAncestor(
                    self.index.get(old_tip).hash.to_string(),
                    self.index.get(new_tip).hash.to_string(),
                )
            })?;

        self.storage.begin();
        match self.reorganize_inner(old_tip, new_tip, ancestor) {
            Ok((summary, new_state)) => {
                self.storage.commit().map_err(HunterError::Chain)?;
                self.index.set_best(new_tip);
                self.current_state = new_state;
                Ok(summary)
            }
            Err(e) => {
                self.storage.abort();
                self.mark_invalid(new_tip);
                Err(e)
            }
        }
    }

    fn reorganize_inner(
        &mut self,
        old_tip: BlockIndexId,
        new_tip: BlockIndexId,
        ancestor: BlockIndexId,
    ) -> Result<(ReorgSummary, GameState), HunterError> {
        let down = {
            let mut branch = self.index.branch_to(ancestor, old_tip);
            branch.reverse();
            branch
        };
        let up = self.index.branch_to(ancestor, new_tip);

        let mut resurrected = Vec::new();
        for id in &down {
            let node = self.index.get(*id);
            let (hash, height) = (node.hash, node.height);
            let block = self
                .storage
                .read_block(&hash)
                .map_err(HunterError::Chain)?
                .ok_or_else(|| ChainError::BlockNotFound(hash.to_string()))?;
            resurrected.extend(self.disconnect_block_inner(&block, height)?);
        }

        let mut state = self.game_state_at(self.index.get(ancestor).height)?;
        for id in &up {
            let node = self.index.get(*id);
            let (hash, height) = (node.hash, node.height);
            let block = self
                .storage
                .read_block(&hash)
                .map_err(HunterError::Chain)?
                .ok_or_else(|| ChainError::BlockNotFound(hash.to_string()))?;
            let (_, outcome) = self.connect_block_inner(&block, height, &state)?;
            state = outcome.new_state;
        }

        Ok((
            ReorgSummary {
                tip: self.index.get(new_tip).hash,
                disconnected: down.len(),
                connected: up.len(),
                resurrected,
            },
            state,
        ))
    }

    /// Recompute the game state at a best-chain height by replaying from
    /// the nearest persisted snapshot.
    pub fn game_state_at(&self, height: i32) -> Result<GameState, HunterError> {
        if height < 0 {
            return Ok(GameState::new());
        }
        if height == self.current_state.height {
            return Ok(self.current_state.clone());
        }

        let (mut replay_from, mut state) = match self
            .storage
            .latest_game_state_at_or_below(height)
            .map_err(HunterError::Chain)?
        {
            Some((h, state)) => (h + 1, state),
            None => (0, GameState::new()),
        };
        if state.height == height {
            return Ok(state);
        }

        while replay_from <= height {
            let id = self
                .index
                .find_by_height(replay_from)
                .ok_or(ChainError::GameStateMissing(replay_from))
                .map_err(HunterError::Chain)?;
            let hash = self.index.get(id).hash;
            let block = self
                .storage
                .read_block(&hash)
                .map_err(HunterError::Chain)?
                .ok_or_else(|| ChainError::BlockNotFound(hash.to_string()))?;
            let moves = moves_from_block(&block).map_err(HunterError::Block)?;
            let data = StepData {
                name_coin_amount: NAME_COIN_AMOUNT,
                treasure_amount: 9 * get_block_value(replay_from, 0),
                new_hash: hash,
                moves,
            };
            let (next, _) = perform_step(&state, &data)
                .map_err(|e| BlockError::GameStep(e.to_string()))
                .map_err(HunterError::Block)?;
            state = next;
            replay_from += 1;
        }
        Ok(state)
    }

    /// Game-side admission check for the mempool: resolves the spent
    /// outputs' addresses and defers to the extension.
    pub fn check_mempool_move(&self, tx: &Transaction) -> Result<(), TransactionError> {
        let mut input_addresses = Vec::new();
        for input in &tx.vin {
            if let Ok(Some(entry)) = self.storage.read_utxo(&input.prevout) {
                if let Some(hash) = extract_destination(&entry.txo.script_pubkey) {
                    input_addresses.push(hash160_to_address(self.network, &hash));
                }
            }
        }
        self.rules
            .accept_to_memory_pool(&self.current_state, tx, &input_addresses)
    }

    /// Assemble a candidate block over the current tip from the given
    /// mempool transactions (already in the desired order).
    ///
    /// Transactions that no longer connect are skipped, never fatal. The
    /// game transactions and their merkle root come from a tax-probe step,
    /// which is exact because they are independent of the eventual block
    /// hash.
    pub fn create_block_template(
        &mut self,
        candidates: &[Transaction],
        miner_dest: &[u8; 20],
        time: u32,
    ) -> Result<Block, HunterError> {
        let parent = self
            .index
            .best()
            .ok_or_else(|| ChainError::Storage("no chain to build on".into()))?;
        let parent_node = self.index.get(parent);
        let (prev_hash, height) = (parent_node.hash, parent_node.height + 1);

        let mut names_in_block: BTreeSet<Vec<u8>> = BTreeSet::new();
        let mut spent: BTreeSet<OutPoint> = BTreeSet::new();
        let mut selected: Vec<Transaction> = Vec::new();
        let mut fees: i64 = 0;

        for tx in candidates {
            if validation::check_transaction(tx).is_err()
                || self.rules.check_transaction(tx).is_err()
            {
                continue;
            }
            if tx.vin.iter().any(|input| spent.contains(&input.prevout)) {
                continue;
            }
            let Ok(prev_entries) = self.resolve_inputs(tx, 0) else {
                continue;
            };
            let view: HashMap<OutPoint, UtxoEntry> = tx
                .vin
                .iter()
                .map(|input| input.prevout)
                .zip(prev_entries.iter().cloned())
                .collect();
            let Ok(flow) =
                validation::connect_inputs(tx, |op| view.get(op).cloned(), height, true)
            else {
                continue;
            };
            let pos = TxPos {
                txid: tx.txid(),
                block_hash: Hash256::ZERO,
                tx_index: selected.len() as u32 + 1,
            };
            if self
                .rules
                .connect_inputs(
                    &mut self.storage,
                    tx,
                    &prev_entries,
                    height,
                    pos,
                    false,
                    true,
                    &mut names_in_block,
                )
                .is_err()
            {
                continue;
            }
            if self.check_mempool_move(tx).is_err() {
                continue;
            }
            for input in &tx.vin {
                spent.insert(input.prevout);
            }
            fees += flow.fee;
            selected.push(tx.clone());
        }

        // Tax probe: the zero hash stops the step before the randomized
        // stages, and the derived transactions depend only on the
        // deterministic half.
        let mut moves = Vec::new();
        for tx in &selected {
            if let Some((name, value)) = extract_move_value(tx) {
                let player = String::from_utf8_lossy(&name).into_owned();
                if let Some(m) = Move::parse(&player, &value) {
                    moves.push(m);
                }
            }
        }
        let probe = StepData {
            name_coin_amount: NAME_COIN_AMOUNT,
            treasure_amount: 9 * get_block_value(height, 0),
            new_hash: Hash256::ZERO,
            moves,
        };
        let (probe_state, result) = perform_step(&self.current_state, &probe)
            .map_err(|e| BlockError::GameStep(e.to_string()))
            .map_err(HunterError::Block)?;
        let vgametx = gametx::create_game_transactions(
            &self.storage,
            &self.current_state,
            &probe_state,
            &result,
        )
        .map_err(HunterError::Block)?;

        let mut coinbase_sig = Script::new();
        coinbase_sig.push_int(height as i64).push_int(time as i64);
        let coinbase = Transaction {
            version: 1,
            vin: vec![TxIn::new(OutPoint::null(), coinbase_sig)],
            vout: vec![TxOut {
                value: get_block_value(height, fees + result.tax_amount),
                script_pubkey: p2pkh_script(miner_dest),
            }],
            lock_time: 0,
        };

        let mut vtx = vec![coinbase];
        vtx.extend(selected);
        let txids: Vec<Hash256> = vtx.iter().map(|tx| tx.txid()).collect();

        let header = BlockHeader {
            version: 1,
            prev_hash,
            tx_merkle_root: merkle::merkle_root(&txids),
            game_merkle_root: merkle::tx_merkle_root(&vgametx),
            time,
            bits: next_work_required(
                self.network,
                hunter_core::types::PowAlgo::Sha256d,
                self.index.algo_ancestors(parent, hunter_core::types::PowAlgo::Sha256d),
            ),
            nonce: 0,
            aux_pow: None,
        };

        Ok(Block { header, vtx, vgametx })
    }

    /// The money-supply identity checked by `analyseutxo`: UTXO total plus
    /// map loot, carried loot, and the game fund, minus name-locked coins,
    /// equals premine plus ten coins of emission per block.
    ///
    /// Coins locked in name outputs are subtracted because they are also
    /// present on the map as general values: every alive player represents
    /// their locked coin in the world, and it turns into loot the moment
    /// they die. The world-side share is counted by walking the alive
    /// players' current name outputs, so the identity stays exact while
    /// names are alive, not only after they free up.
    pub fn analyse_supply(&self) -> Result<SupplyAnalysis, HunterError> {
        let summary = self.storage.utxo_summary().map_err(HunterError::Chain)?;
        let state = &self.current_state;
        let height = self.best_height();

        let mut expected = hunter_core::constants::PREMINE_AMOUNT;
        expected -= get_block_value(0, 0);
        for h in 0..=height {
            expected += 10 * get_block_value(h, 0);
        }

        // Value locked under the alive players' names. Pending name_new
        // commitments are intentionally not counted: their lock is
        // destroyed unless the registration completes.
        let mut live_name_locked: i64 = 0;
        for pid in state.players.keys() {
            let Some(entry) = self
                .storage
                .name_read(pid.as_bytes())
                .map_err(HunterError::Chain)?
            else {
                continue;
            };
            let Some((tx, _)) = self
                .storage
                .read_tx(&entry.tx_pos.txid)
                .map_err(HunterError::Chain)?
            else {
                continue;
            };
            if let Some(n) = validation::index_of_name_output(&tx) {
                live_name_locked += tx.vout[n].value;
            }
        }

        let actual = summary.total_amount + state.total_loot() + state.total_carried()
            + state.game_fund
            + live_name_locked
            - summary.in_names_amount;

        Ok(SupplyAnalysis {
            utxo: summary,
            loot_on_map: state.total_loot(),
            loot_carried: state.total_carried(),
            game_fund: state.game_fund,
            live_name_locked,
            actual,
            expected,
        })
    }
}

/// Output of [`ChainContext::analyse_supply`].
#[derive(Clone, Copy, Debug)]
pub struct SupplyAnalysis {
    pub utxo: hunter_core::utxo::UtxoSummary,
    pub loot_on_map: i64,
    pub loot_carried: i64,
    pub game_fund: i64,
    /// Value locked under alive players' names, the world-side twin of
    /// the name outputs counted in `utxo.in_names_amount`.
    pub live_name_locked: i64,
    pub actual: i64,
    pub expected: i64,
}

impl SupplyAnalysis {
    /// Whether the ledger and the game world balance. Fees paid but not
    /// claimed by a coinbase (and unclaimed coinbase headroom) make the
    /// actual supply at most the expected one.
    pub fn balances(&self) -> bool {
        self.actual <= self.expected
    }
}
