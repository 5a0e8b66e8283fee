//! Transaction validation.
//!
//! Two levels:
//!
//! - **Context-free** ([`check_transaction`]): structure, value ranges, the
//!   coinbase scriptSig window, and name-argument bounds. Anything that can
//!   be decided from the transaction bytes alone.
//! - **Contextual** ([`connect_inputs`]): resolve every prevout against a
//!   UTXO view, enforce maturity, run the script interpreter, and compute
//!   the fee.
//!
//! The name-operation *state machine* (NEW → FIRSTUPDATE → UPDATE) is
//! contextual across the name index and lives in the consensus crate's
//! rules; only argument shape is checked here. Move-JSON validity likewise
//! belongs to the game rules.

use std::collections::HashSet;

use crate::constants::{
    money_range, MAX_BLOCK_SIZE, MAX_NAME_LENGTH, MAX_VALUE_LENGTH,
};
use crate::error::TransactionError;
use crate::script::{classify, decode_name_script, verify_script, NameOp, ScriptType};
use crate::types::{OutPoint, Transaction, UtxoEntry};

/// Value totals of a successfully connected transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueFlow {
    pub value_in: i64,
    pub value_out: i64,
    pub fee: i64,
}

/// Context-free checks on a single transaction.
pub fn check_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.vin.is_empty() || tx.vout.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }

    // Game transactions are derived by the step function; a peer handing
    // one over is consensus-invalid on its face.
    if tx.is_game_tx() {
        return Err(TransactionError::GameTxOnWire);
    }

    let size = crate::ser::serialize(tx).len();
    if size > MAX_BLOCK_SIZE {
        return Err(TransactionError::Oversized { size, max: MAX_BLOCK_SIZE });
    }

    let mut total: i64 = 0;
    for out in &tx.vout {
        if !money_range(out.value) {
            return Err(TransactionError::ValueOutOfRange);
        }
        total = total.checked_add(out.value).ok_or(TransactionError::ValueOverflow)?;
        if !money_range(total) {
            return Err(TransactionError::ValueOutOfRange);
        }
    }

    if tx.is_coinbase() {
        let len = tx.vin[0].script_sig.len();
        if !(2..=230).contains(&len) {
            return Err(TransactionError::BadCoinbaseLength(len));
        }
    } else {
        let mut seen = HashSet::with_capacity(tx.vin.len());
        for (i, input) in tx.vin.iter().enumerate() {
            if input.prevout.is_null() {
                return Err(TransactionError::NullPrevout(i));
            }
            if !seen.insert(input.prevout) {
                return Err(TransactionError::DuplicateInput(input.prevout.to_string()));
            }
        }
    }

    if tx.is_name_tx() {
        check_name_outputs(tx)?;
    }

    Ok(())
}

/// A name transaction carries exactly one well-formed name output with
/// bounded argument lengths.
fn check_name_outputs(tx: &Transaction) -> Result<(), TransactionError> {
    let mut found = None;
    for out in &tx.vout {
        if let Some(name_script) = decode_name_script(&out.script_pubkey) {
            if found.is_some() {
                return Err(TransactionError::NameRuleViolation(
                    "multiple name outputs".into(),
                ));
            }
            found = Some(name_script);
        }
    }
    let name_script = found.ok_or_else(|| {
        TransactionError::NameRuleViolation("name tx without name output".into())
    })?;

    match name_script.op {
        NameOp::New => {
            if name_script.new_hash().unwrap().len() != 20 {
                return Err(TransactionError::NameRuleViolation(
                    "name_new hash must be 20 bytes".into(),
                ));
            }
        }
        NameOp::FirstUpdate | NameOp::Update => {
            if name_script.name().unwrap().len() > MAX_NAME_LENGTH {
                return Err(TransactionError::NameRuleViolation("name too long".into()));
            }
            if name_script.value().unwrap().len() > MAX_VALUE_LENGTH {
                return Err(TransactionError::NameRuleViolation("value too long".into()));
            }
            if let Some(rand) = name_script.rand() {
                if rand.len() > 20 {
                    return Err(TransactionError::NameRuleViolation(
                        "rand commitment too long".into(),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Find the output index carrying the name operation of a name tx.
pub fn index_of_name_output(tx: &Transaction) -> Option<usize> {
    tx.vout
        .iter()
        .position(|out| decode_name_script(&out.script_pubkey).is_some())
}

/// Resolve and verify a transaction's inputs against a UTXO view.
///
/// `get_utxo` supplies the pre-block view; when mining it also consults the
/// test pool. Verifies scripts (unless `check_scripts` is false, used when
/// reconnecting known-good blocks during reorg), enforces coinbase and
/// game-reward maturity, and returns the value flow.
///
/// Coinbase transactions have no inputs to connect; callers skip them.
pub fn connect_inputs<F>(
    tx: &Transaction,
    get_utxo: F,
    height: i32,
    check_scripts: bool,
) -> Result<ValueFlow, TransactionError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
{
    let mut value_in: i64 = 0;

    for (i, input) in tx.vin.iter().enumerate() {
        let entry = get_utxo(&input.prevout)
            .ok_or_else(|| TransactionError::MissingInputs(input.prevout.to_string()))?;

        if !entry.is_mature(height) {
            let kind = if entry.is_coinbase { "coinbase" } else { "game reward" };
            return Err(TransactionError::Immature { kind, depth: height - entry.height });
        }

        if check_scripts {
            verify_script(&input.script_sig, &entry.txo.script_pubkey, tx, i)
                .map_err(|source| TransactionError::BadScript { index: i, source })?;
        }

        value_in = value_in
            .checked_add(entry.txo.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    let value_out = tx.total_output_value().ok_or(TransactionError::ValueOverflow)?;
    if value_in < value_out {
        return Err(TransactionError::InsufficientFunds { value_in, value_out });
    }

    Ok(ValueFlow { value_in, value_out, fee: value_in - value_out })
}

/// Total legacy sig-op count of a transaction (both script halves).
pub fn tx_sig_op_count(tx: &Transaction) -> usize {
    let mut count = 0;
    for input in &tx.vin {
        count += input.script_sig.sig_op_count();
    }
    for output in &tx.vout {
        count += output.script_pubkey.sig_op_count();
    }
    count
}

/// Whether every output of a transaction is standard.
pub fn is_standard_tx(tx: &Transaction) -> bool {
    tx.vout.iter().all(crate::script::is_standard_txout)
}

/// Whether a transaction spends or creates name outputs without being a
/// name transaction (both are consensus-invalid).
pub fn has_unexpected_name_io<F>(tx: &Transaction, get_utxo: F) -> bool
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
{
    if tx.is_name_tx() || tx.is_game_tx() {
        return false;
    }
    let name_out = tx
        .vout
        .iter()
        .any(|out| matches!(classify(&out.script_pubkey), ScriptType::Name(_)));
    if name_out {
        return true;
    }
    tx.vin.iter().any(|input| {
        get_utxo(&input.prevout)
            .map(|entry| decode_name_script(&entry.txo.script_pubkey).is_some())
            .unwrap_or(false)
    })
}
