//! Contextual name-operation rules.
//!
//! The allowed operation sequences form a small state machine over the
//! name index and the spending graph:
//!
//! ```text
//! (nothing)            -> NAME_NEW          lock >= NAMENEW_COIN_AMOUNT
//! NAME_NEW             -> NAME_FIRSTUPDATE  old style: hash commitment,
//!                                           depth >= 2
//! (nothing)            -> NAME_FIRSTUPDATE  new style, post carrying-cap
//! FIRSTUPDATE | UPDATE -> NAME_UPDATE       same name, once per block,
//!                                           lock never decreasing
//! ```
//!
//! Non-name transactions may neither create nor spend name outputs; a
//! name would otherwise be burned by an ordinary payment.

use std::collections::BTreeSet;

use hunter_core::constants::{
    Fork, Network, MIN_FIRSTUPDATE_DEPTH, NAMENEW_COIN_AMOUNT,
};
use hunter_core::error::TransactionError;
use hunter_core::hashing::hash160;
use hunter_core::names::NameEntry;
use hunter_core::script::{decode_name_script, NameOp, NameScript};
use hunter_core::types::{Transaction, TxPos, UtxoEntry};
use hunter_core::validation::index_of_name_output;

use crate::storage::ChainStorage;

fn violation(msg: impl Into<String>) -> TransactionError {
    TransactionError::NameRuleViolation(msg.into())
}

/// The decoded name input of a transaction, if any.
struct PrevNameInput {
    script: NameScript,
    value: i64,
    height: i32,
}

fn find_name_input(
    prev_entries: &[UtxoEntry],
) -> Result<Option<PrevNameInput>, TransactionError> {
    let mut found: Option<PrevNameInput> = None;
    for entry in prev_entries {
        if let Some(script) = decode_name_script(&entry.txo.script_pubkey) {
            if found.is_some() {
                return Err(violation("multiple previous name inputs"));
            }
            found = Some(PrevNameInput {
                script,
                value: entry.txo.value,
                height: entry.height,
            });
        }
    }
    Ok(found)
}

/// Enforce the name rules for one transaction whose inputs are already
/// resolved. On `f_block`, the resulting index entry is written.
///
/// `names_in_block` tracks names operated on earlier in the same block so
/// that a name is touched at most once per block.
#[allow(clippy::too_many_arguments)]
pub fn connect_name_inputs(
    storage: &mut dyn ChainStorage,
    network: Network,
    tx: &Transaction,
    prev_entries: &[UtxoEntry],
    height: i32,
    pos: TxPos,
    f_block: bool,
    f_miner: bool,
    names_in_block: &mut BTreeSet<Vec<u8>>,
) -> Result<(), TransactionError> {
    let prev = find_name_input(prev_entries)?;

    if !tx.is_name_tx() {
        // Introduced with the carrying-cap fork, but no offending tx
        // exists before it, so the check is unconditional.
        if tx
            .vout
            .iter()
            .any(|out| decode_name_script(&out.script_pubkey).is_some())
        {
            return Err(violation("non-name tx with name outputs"));
        }
        if prev.is_some() {
            return Err(violation("non-name tx spending a name input"));
        }
        return Ok(());
    }

    let n_out = index_of_name_output(tx)
        .ok_or_else(|| violation("name tx without name output"))?;
    let name_script = decode_name_script(&tx.vout[n_out].script_pubkey)
        .expect("index_of_name_output found a name script");
    let locked = tx.vout[n_out].value;

    let depth = prev.as_ref().map(|p| height - p.height);
    if depth.is_some_and(|d| d < 0) {
        return Err(violation("previous name output above current height"));
    }

    match name_script.op {
        NameOp::New => {
            if prev.is_some() {
                return Err(violation("name_new spending a previous name"));
            }
            if locked < NAMENEW_COIN_AMOUNT {
                return Err(violation("name_new locks too little"));
            }
        }

        NameOp::FirstUpdate => {
            let name = name_script.name().unwrap();
            match name_script.rand() {
                // Old style: completes a name_new commitment.
                Some(rand) => {
                    let prev = prev
                        .as_ref()
                        .filter(|p| p.script.op == NameOp::New)
                        .ok_or_else(|| {
                            violation("old-style firstupdate without name_new input")
                        })?;
                    let mut to_hash = rand.to_vec();
                    to_hash.extend_from_slice(name);
                    if prev.script.new_hash().unwrap() != hash160(&to_hash) {
                        return Err(violation("firstupdate commitment hash mismatch"));
                    }
                    if (f_block || f_miner)
                        && depth.unwrap() < MIN_FIRSTUPDATE_DEPTH
                    {
                        return Err(violation("name_new commitment not yet mature"));
                    }
                }
                // New style: direct registration, post carrying-cap.
                None => {
                    if !network.fork_in_effect(Fork::CarryingCap, height) {
                        return Err(violation(
                            "direct registration before the carrying-cap fork",
                        ));
                    }
                    if prev.is_some() {
                        return Err(violation(
                            "direct firstupdate must not spend a name input",
                        ));
                    }
                }
            }

            if !storage
                .name_available(name)
                .map_err(|e| violation(e.to_string()))?
            {
                return Err(violation("name is taken"));
            }
            register_block_name(names_in_block, name, f_block || f_miner)?;
        }

        NameOp::Update => {
            let name = name_script.name().unwrap();
            let prev = prev.as_ref().ok_or_else(|| {
                violation("name_update without a previous name input")
            })?;
            if !matches!(prev.script.op, NameOp::FirstUpdate | NameOp::Update) {
                return Err(violation("name_update must spend firstupdate or update"));
            }
            if prev.script.name() != Some(name) {
                return Err(violation("name_update name mismatch"));
            }
            if (f_block || f_miner) && depth == Some(0) {
                return Err(violation("name updated twice in one block"));
            }
            // Before the life-steal fork the locked coin is fixed;
            // afterwards it may only grow.
            if !network.fork_in_effect(Fork::LifeSteal, height) {
                if locked != prev.value {
                    return Err(violation("locked amount must stay constant"));
                }
            } else if locked < prev.value {
                return Err(violation("locked amount decreased"));
            }
            register_block_name(names_in_block, name, f_block || f_miner)?;
        }
    }

    if f_block {
        if let Some(value) = name_script.value() {
            storage
                .name_push(
                    name_script.name().unwrap(),
                    NameEntry { height, value: value.to_vec(), tx_pos: pos },
                )
                .map_err(|e| violation(e.to_string()))?;
        }
    }

    Ok(())
}

fn register_block_name(
    names_in_block: &mut BTreeSet<Vec<u8>>,
    name: &[u8],
    enforced: bool,
) -> Result<(), TransactionError> {
    if enforced && !names_in_block.insert(name.to_vec()) {
        return Err(violation(format!(
            "name {} already operated on in this block",
            String::from_utf8_lossy(name),
        )));
    }
    Ok(())
}

/// Undo a name transaction's index entry on block disconnect.
pub fn disconnect_name_inputs(
    storage: &mut dyn ChainStorage,
    tx: &Transaction,
    height: i32,
) -> Result<(), TransactionError> {
    if !tx.is_name_tx() {
        return Ok(());
    }
    let Some(n_out) = index_of_name_output(tx) else {
        return Ok(());
    };
    let name_script = decode_name_script(&tx.vout[n_out].script_pubkey).unwrap();
    if let Some(name) = name_script.name() {
        storage
            .name_pop(name, height)
            .map_err(|e| violation(e.to_string()))?;
    }
    Ok(())
}
