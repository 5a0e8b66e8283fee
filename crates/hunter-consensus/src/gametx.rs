//! Derived game transactions.
//!
//! Each block's step produces two kinds of transactions, built here in a
//! fully deterministic order (killed players first, then bounties, both in
//! map order):
//!
//! - **Death transactions** spend the victim's locked name output, marking
//!   the name dead in the index. The standard locked coin becomes map loot
//!   inside the step; only the excess above [`NAME_COIN_AMOUNT`] (possible
//!   once locks may grow) is refunded to the player's reward address.
//! - **Bounty transactions** pay banked loot from the null-prevout
//!   treasury to the banking player.
//!
//! Game transactions never cross the wire; they are recomputed and checked
//! against the block's game merkle root by every validator.

use hunter_core::constants::{GAME_TX_VERSION, NAME_COIN_AMOUNT, VALUE_DEAD};
use hunter_core::error::BlockError;
use hunter_core::address::decode_address;
use hunter_core::names::NameEntry;
use hunter_core::script::{
    decode_name_script, extract_destination, p2pkh_script, Script,
};
use hunter_core::types::{Hash256, OutPoint, Transaction, TxIn, TxOut, TxPos};
use hunter_core::validation::index_of_name_output;

use hunter_game::state::GameState;
use hunter_game::step::StepResult;

use crate::storage::ChainStorage;

fn game_err(msg: impl Into<String>) -> BlockError {
    BlockError::GameStep(msg.into())
}

/// Recognise a death input by its scriptSig: the name followed by the
/// dead marker.
pub fn is_player_death_input(input: &TxIn) -> Option<Vec<u8>> {
    let script = &input.script_sig;
    let mut pc = 0;
    let (_, name) = script.get_op(&mut pc).ok()?;
    let name = name?.to_vec();
    let (_, marker) = script.get_op(&mut pc).ok()?;
    if marker? == VALUE_DEAD && pc == script.len() {
        Some(name)
    } else {
        None
    }
}

fn death_script_sig(name: &[u8]) -> Script {
    let mut script = Script::new();
    script.push_data(name).push_data(VALUE_DEAD);
    script
}

fn bounty_script_sig(
    name: &[u8],
    char_index: u32,
    first_block: i32,
    last_block: i32,
    coord: (i16, i16),
) -> Script {
    let mut script = Script::new();
    script
        .push_data(name)
        .push_int(char_index as i64)
        .push_int(first_block as i64)
        .push_int(last_block as i64)
        .push_int(coord.0 as i64)
        .push_int(coord.1 as i64);
    script
}

/// Resolve where a player's game payouts go: the reward address if set,
/// otherwise the address holding the name output.
fn payout_destination(
    reward_address: &str,
    name_out_script: &Script,
) -> Result<[u8; 20], BlockError> {
    if !reward_address.is_empty() {
        if let Ok((_, hash)) = decode_address(reward_address) {
            return Ok(hash);
        }
    }
    extract_destination(name_out_script)
        .ok_or_else(|| game_err("name output has no extractable destination"))
}

/// The name output currently locked for `name`.
fn locked_name_output(
    storage: &dyn ChainStorage,
    name: &[u8],
) -> Result<(Hash256, u32, TxOut), BlockError> {
    let entry: NameEntry = storage
        .name_read(name)
        .map_err(|e| game_err(e.to_string()))?
        .ok_or_else(|| game_err("killed player has no name entry"))?;
    let (tx, _) = storage
        .read_tx(&entry.tx_pos.txid)
        .map_err(|e| game_err(e.to_string()))?
        .ok_or_else(|| game_err("name tx missing from tx index"))?;
    let n_out = index_of_name_output(&tx)
        .ok_or_else(|| game_err("recorded name tx has no name output"))? as u32;
    let txo = tx.vout[n_out as usize].clone();
    Ok((entry.tx_pos.txid, n_out, txo))
}

/// Build the block's derived transactions from a completed step.
///
/// `prev_state` supplies the reward addresses of players killed this step;
/// bounty addresses travel inside [`StepResult`] (captured at banking
/// time), so the post-step state is not consulted.
pub fn create_game_transactions(
    storage: &dyn ChainStorage,
    prev_state: &GameState,
    _new_state: &GameState,
    result: &StepResult,
) -> Result<Vec<Transaction>, BlockError> {
    let mut out = Vec::new();

    for pid in &result.killed_players {
        let (txid, n_out, txo) = locked_name_output(storage, pid.as_bytes())?;
        let reward_address = prev_state
            .players
            .get(pid)
            .map(|p| p.reward_address.as_str())
            .unwrap_or("");
        let refund = (txo.value - NAME_COIN_AMOUNT).max(0);
        let vout = if refund > 0 {
            let dest = payout_destination(reward_address, &txo.script_pubkey)?;
            vec![TxOut { value: refund, script_pubkey: p2pkh_script(&dest) }]
        } else {
            Vec::new()
        };
        out.push(Transaction {
            version: GAME_TX_VERSION,
            vin: vec![TxIn::new(
                OutPoint::new(txid, n_out),
                death_script_sig(pid.as_bytes()),
            )],
            vout,
            lock_time: 0,
        });
    }

    for ((pid, char_index), bounty) in &result.bounties {
        let (_, _, name_txo) = locked_name_output(storage, pid.as_bytes())?;
        let dest = payout_destination(&bounty.address, &name_txo.script_pubkey)?;
        out.push(Transaction {
            version: GAME_TX_VERSION,
            vin: vec![TxIn::new(
                OutPoint::null(),
                bounty_script_sig(
                    pid.as_bytes(),
                    *char_index,
                    bounty.first_block,
                    bounty.last_block,
                    (bounty.coord.x, bounty.coord.y),
                ),
            )],
            vout: vec![TxOut { value: bounty.amount, script_pubkey: p2pkh_script(&dest) }],
            lock_time: 0,
        });
    }

    Ok(out)
}

/// Apply a derived game transaction: spend killed name outputs (marking
/// the names dead), credit the outputs, index the transaction.
pub fn connect_game_tx(
    storage: &mut dyn ChainStorage,
    tx: &Transaction,
    height: i32,
    pos: TxPos,
) -> Result<(), BlockError> {
    for input in &tx.vin {
        if input.prevout.is_null() {
            continue;
        }
        let entry = storage
            .read_utxo(&input.prevout)
            .map_err(|e| game_err(e.to_string()))?
            .ok_or_else(|| game_err("game tx spends a missing output"))?;
        let name_script = decode_name_script(&entry.txo.script_pubkey)
            .ok_or_else(|| game_err("game tx input is not a name output"))?;
        let name = name_script
            .name()
            .ok_or_else(|| game_err("game tx input spends a name_new commitment"))?;
        if is_player_death_input(input).as_deref() != Some(name) {
            return Err(game_err("death marker does not match spent name"));
        }
        storage
            .remove_utxo(&input.prevout)
            .map_err(|e| game_err(e.to_string()))?;
        storage
            .name_push(
                name,
                NameEntry { height, value: VALUE_DEAD.to_vec(), tx_pos: pos },
            )
            .map_err(|e| game_err(e.to_string()))?;
    }

    storage
        .insert_tx_outputs(tx, height)
        .map_err(|e| game_err(e.to_string()))?;
    storage
        .write_tx_index(&tx.txid(), pos)
        .map_err(|e| game_err(e.to_string()))?;
    Ok(())
}

/// Undo [`connect_game_tx`]: remove the credited outputs, restore the
/// spent name outputs, and pop the dead markers recorded at `height`.
pub fn disconnect_game_tx(
    storage: &mut dyn ChainStorage,
    block_height_of: &dyn Fn(&Hash256) -> Option<i32>,
    tx: &Transaction,
    height: i32,
) -> Result<(), BlockError> {
    storage
        .remove_tx_outputs(tx)
        .map_err(|e| game_err(e.to_string()))?;
    storage
        .erase_tx_index(&tx.txid())
        .map_err(|e| game_err(e.to_string()))?;

    for input in &tx.vin {
        if input.prevout.is_null() {
            continue;
        }
        let (prev_tx, prev_pos) = storage
            .read_tx(&input.prevout.txid)
            .map_err(|e| game_err(e.to_string()))?
            .ok_or_else(|| game_err("previous name tx unavailable for undo"))?;
        let prev_height = block_height_of(&prev_pos.block_hash)
            .ok_or_else(|| game_err("previous block left the index"))?;
        let txo = prev_tx
            .vout
            .get(input.prevout.n as usize)
            .cloned()
            .ok_or_else(|| game_err("previous output index out of range"))?;
        storage
            .insert_utxo(
                input.prevout,
                hunter_core::types::UtxoEntry {
                    txo,
                    height: prev_height,
                    is_coinbase: prev_tx.is_coinbase(),
                    is_game_tx: prev_tx.is_game_tx(),
                },
            )
            .map_err(|e| game_err(e.to_string()))?;

        let name = is_player_death_input(input)
            .ok_or_else(|| game_err("undoing a malformed death input"))?;
        storage
            .name_pop(&name, height)
            .map_err(|e| game_err(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryChainStorage;
    use hunter_core::constants::NAMECOIN_TX_VERSION;
    use hunter_core::script;
    use hunter_core::types::BlockHeader;
    use hunter_game::state::{Coord, PlayerState};
    use hunter_game::step::Bounty;

    /// Store a confirmed name registration for `name`, returning its txid.
    fn seed_name(
        storage: &mut MemoryChainStorage,
        name: &[u8],
        locked: i64,
        height: i32,
    ) -> Hash256 {
        let tx = Transaction {
            version: NAMECOIN_TX_VERSION,
            vin: vec![TxIn::new(OutPoint::new(Hash256([0xAA; 32]), 0), Script::new())],
            vout: vec![TxOut {
                value: locked,
                script_pubkey: script::name_firstupdate_script(
                    name,
                    b"{\"color\":0}",
                    &[0x11; 20],
                ),
            }],
            lock_time: height as u32,
        };
        let txid = tx.txid();
        let block = hunter_core::types::Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256::ZERO,
                tx_merkle_root: Hash256::ZERO,
                game_merkle_root: Hash256::ZERO,
                time: height as u32,
                bits: 0x1d00ffff,
                nonce: height as u32,
                aux_pow: None,
            },
            vtx: vec![tx.clone()],
            vgametx: vec![],
        };
        storage.write_block(&block).unwrap();
        let pos = TxPos { txid, block_hash: block.hash(), tx_index: 0 };
        storage.write_tx_index(&txid, pos).unwrap();
        storage
            .name_push(
                name,
                NameEntry { height, value: b"{\"color\":0}".to_vec(), tx_pos: pos },
            )
            .unwrap();
        storage.insert_tx_outputs(&tx, height).unwrap();
        txid
    }

    fn killed_result(name: &str) -> StepResult {
        let mut result = StepResult::default();
        result.killed.insert((name.to_string(), 0));
        result.killed_players.insert(name.to_string());
        result
    }

    #[test]
    fn death_tx_spends_name_output() {
        let mut storage = MemoryChainStorage::new();
        let txid = seed_name(&mut storage, b"alice", NAME_COIN_AMOUNT, 10);
        let prev_state = {
            let mut s = GameState::new();
            s.players
                .insert("alice".into(), PlayerState::spawn(0, Coord::new(0, 0), 3));
            s
        };
        let new_state = GameState::new();
        let result = killed_result("alice");

        let txs =
            create_game_transactions(&storage, &prev_state, &new_state, &result).unwrap();
        assert_eq!(txs.len(), 1);
        let death = &txs[0];
        assert!(death.is_game_tx());
        assert_eq!(death.vin[0].prevout, OutPoint::new(txid, 0));
        // Standard lock: the whole coin becomes loot, no refund output.
        assert!(death.vout.is_empty());
        assert_eq!(is_player_death_input(&death.vin[0]).unwrap(), b"alice");
    }

    #[test]
    fn oversized_lock_refunds_excess() {
        let mut storage = MemoryChainStorage::new();
        seed_name(&mut storage, b"rich", NAME_COIN_AMOUNT + 5_000, 10);
        let mut prev_state = GameState::new();
        prev_state
            .players
            .insert("rich".into(), PlayerState::spawn(0, Coord::new(0, 0), 3));
        let result = killed_result("rich");

        let txs =
            create_game_transactions(&storage, &prev_state, &GameState::new(), &result)
                .unwrap();
        assert_eq!(txs[0].vout.len(), 1);
        assert_eq!(txs[0].vout[0].value, 5_000);
    }

    #[test]
    fn bounty_tx_pays_from_treasury() {
        let mut storage = MemoryChainStorage::new();
        seed_name(&mut storage, b"banker", NAME_COIN_AMOUNT, 10);
        let mut new_state = GameState::new();
        new_state
            .players
            .insert("banker".into(), PlayerState::spawn(0, Coord::new(0, 0), 3));
        let mut result = StepResult::default();
        result.bounties.insert(
            ("banker".to_string(), 0),
            Bounty {
                amount: 900,
                first_block: 3,
                last_block: 7,
                coord: Coord::new(0, 2),
                address: String::new(),
            },
        );

        let txs =
            create_game_transactions(&storage, &GameState::new(), &new_state, &result)
                .unwrap();
        assert_eq!(txs.len(), 1);
        let bounty = &txs[0];
        assert!(bounty.vin[0].prevout.is_null());
        assert_eq!(bounty.vout[0].value, 900);
        // A treasury input is not a death input.
        assert_eq!(is_player_death_input(&bounty.vin[0]), None);
    }

    #[test]
    fn derivation_is_deterministic() {
        let mut storage = MemoryChainStorage::new();
        seed_name(&mut storage, b"alice", NAME_COIN_AMOUNT, 10);
        seed_name(&mut storage, b"bob", NAME_COIN_AMOUNT, 11);
        let mut prev_state = GameState::new();
        for name in ["alice", "bob"] {
            prev_state
                .players
                .insert(name.into(), PlayerState::spawn(0, Coord::new(0, 0), 3));
        }
        let mut result = StepResult::default();
        for name in ["bob", "alice"] {
            result.killed.insert((name.to_string(), 0));
            result.killed_players.insert(name.to_string());
        }
        let a = create_game_transactions(&storage, &prev_state, &GameState::new(), &result)
            .unwrap();
        let b = create_game_transactions(&storage, &prev_state, &GameState::new(), &result)
            .unwrap();
        assert_eq!(a, b);
        // Deaths come out in name order regardless of kill order.
        assert_eq!(is_player_death_input(&a[0].vin[0]).unwrap(), b"alice");
        assert_eq!(is_player_death_input(&a[1].vin[0]).unwrap(), b"bob");
    }

    #[test]
    fn connect_marks_name_dead_and_disconnect_restores() {
        let mut storage = MemoryChainStorage::new();
        let txid = seed_name(&mut storage, b"alice", NAME_COIN_AMOUNT, 10);
        let mut prev_state = GameState::new();
        prev_state
            .players
            .insert("alice".into(), PlayerState::spawn(0, Coord::new(0, 0), 3));
        let result = killed_result("alice");
        let txs =
            create_game_transactions(&storage, &prev_state, &GameState::new(), &result)
                .unwrap();
        let death = &txs[0];

        let pos = TxPos {
            txid: death.txid(),
            block_hash: Hash256([0xBB; 32]),
            tx_index: 0,
        };
        connect_game_tx(&mut storage, death, 20, pos).unwrap();
        assert!(storage.name_available(b"alice").unwrap());
        assert!(storage.read_utxo(&OutPoint::new(txid, 0)).unwrap().is_none());

        let height_of = |_: &Hash256| Some(10);
        disconnect_game_tx(&mut storage, &height_of, death, 20).unwrap();
        assert!(!storage.name_available(b"alice").unwrap());
        let restored = storage.read_utxo(&OutPoint::new(txid, 0)).unwrap().unwrap();
        assert_eq!(restored.height, 10);
        assert_eq!(restored.txo.value, NAME_COIN_AMOUNT);
    }

    #[test]
    fn connect_rejects_non_name_spend() {
        let mut storage = MemoryChainStorage::new();
        // A plain P2PKH UTXO.
        let plain = Transaction {
            version: 1,
            vin: vec![TxIn::new(OutPoint::null(), Script::from_bytes(vec![0, 0]))],
            vout: vec![TxOut {
                value: 1000,
                script_pubkey: script::p2pkh_script(&[9; 20]),
            }],
            lock_time: 0,
        };
        storage.insert_tx_outputs(&plain, 5).unwrap();

        let rogue = Transaction {
            version: GAME_TX_VERSION,
            vin: vec![TxIn::new(
                OutPoint::new(plain.txid(), 0),
                death_script_sig(b"alice"),
            )],
            vout: vec![],
            lock_time: 0,
        };
        let pos = TxPos { txid: rogue.txid(), block_hash: Hash256([1; 32]), tx_index: 0 };
        assert!(connect_game_tx(&mut storage, &rogue, 6, pos).is_err());
    }
}
