//! The script interpreter: a predicate evaluator over a stack of byte
//! strings.
//!
//! The opcode set, limits, and signature-hash algorithm follow the Satoshi
//! lineage exactly, because consensus depends on the precise behaviour —
//! including the 4-byte cap on numeric operands and the extra element
//! consumed by `OP_CHECKMULTISIG`. Name operations are not opcodes the VM
//! executes; they are a recognised script *prefix* (small-integer opcode
//! plus pushes, dropped before the ordinary predicate) decoded by
//! [`decode_name_script`].

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::constants::{OPRETURN_MAX_STRLEN, OPRETURN_MIN_LOCKED};
use crate::error::ScriptError;
use crate::hashing::{hash160, sha256d};
use crate::keys::verify_signature;
use crate::types::{Hash256, Transaction, TxOut};

// Push opcodes.
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_RESERVED: u8 = 0x50;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;

// Name operations, encoded as the small-integer opcodes at the head of a
// name script prefix.
pub const OP_NAME_NEW: u8 = OP_1;
pub const OP_NAME_FIRSTUPDATE: u8 = 0x52;
pub const OP_NAME_UPDATE: u8 = 0x53;

// Flow control.
pub const OP_NOP: u8 = 0x61;
pub const OP_VER: u8 = 0x62;
pub const OP_IF: u8 = 0x63;
pub const OP_NOTIF: u8 = 0x64;
pub const OP_VERIF: u8 = 0x65;
pub const OP_VERNOTIF: u8 = 0x66;
pub const OP_ELSE: u8 = 0x67;
pub const OP_ENDIF: u8 = 0x68;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;

// Stack manipulation.
pub const OP_TOALTSTACK: u8 = 0x6b;
pub const OP_FROMALTSTACK: u8 = 0x6c;
pub const OP_2DROP: u8 = 0x6d;
pub const OP_2DUP: u8 = 0x6e;
pub const OP_3DUP: u8 = 0x6f;
pub const OP_2OVER: u8 = 0x70;
pub const OP_2ROT: u8 = 0x71;
pub const OP_2SWAP: u8 = 0x72;
pub const OP_IFDUP: u8 = 0x73;
pub const OP_DEPTH: u8 = 0x74;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_NIP: u8 = 0x77;
pub const OP_OVER: u8 = 0x78;
pub const OP_PICK: u8 = 0x79;
pub const OP_ROLL: u8 = 0x7a;
pub const OP_ROT: u8 = 0x7b;
pub const OP_SWAP: u8 = 0x7c;
pub const OP_TUCK: u8 = 0x7d;

// Splice (all but OP_SIZE disabled).
pub const OP_CAT: u8 = 0x7e;
pub const OP_SUBSTR: u8 = 0x7f;
pub const OP_LEFT: u8 = 0x80;
pub const OP_RIGHT: u8 = 0x81;
pub const OP_SIZE: u8 = 0x82;

// Bitwise (disabled except the equality pair).
pub const OP_INVERT: u8 = 0x83;
pub const OP_AND: u8 = 0x84;
pub const OP_OR: u8 = 0x85;
pub const OP_XOR: u8 = 0x86;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_RESERVED1: u8 = 0x89;
pub const OP_RESERVED2: u8 = 0x8a;

// Arithmetic.
pub const OP_1ADD: u8 = 0x8b;
pub const OP_1SUB: u8 = 0x8c;
pub const OP_2MUL: u8 = 0x8d;
pub const OP_2DIV: u8 = 0x8e;
pub const OP_NEGATE: u8 = 0x8f;
pub const OP_ABS: u8 = 0x90;
pub const OP_NOT: u8 = 0x91;
pub const OP_0NOTEQUAL: u8 = 0x92;
pub const OP_ADD: u8 = 0x93;
pub const OP_SUB: u8 = 0x94;
pub const OP_MUL: u8 = 0x95;
pub const OP_DIV: u8 = 0x96;
pub const OP_MOD: u8 = 0x97;
pub const OP_LSHIFT: u8 = 0x98;
pub const OP_RSHIFT: u8 = 0x99;
pub const OP_BOOLAND: u8 = 0x9a;
pub const OP_BOOLOR: u8 = 0x9b;
pub const OP_NUMEQUAL: u8 = 0x9c;
pub const OP_NUMEQUALVERIFY: u8 = 0x9d;
pub const OP_NUMNOTEQUAL: u8 = 0x9e;
pub const OP_LESSTHAN: u8 = 0x9f;
pub const OP_GREATERTHAN: u8 = 0xa0;
pub const OP_LESSTHANOREQUAL: u8 = 0xa1;
pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;
pub const OP_MIN: u8 = 0xa3;
pub const OP_MAX: u8 = 0xa4;
pub const OP_WITHIN: u8 = 0xa5;

// Crypto.
pub const OP_RIPEMD160: u8 = 0xa6;
pub const OP_SHA1: u8 = 0xa7;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CODESEPARATOR: u8 = 0xab;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

pub const OP_NOP1: u8 = 0xb0;
pub const OP_NOP10: u8 = 0xb9;

// Signature-hash types.
pub const SIGHASH_ALL: u32 = 1;
pub const SIGHASH_NONE: u32 = 2;
pub const SIGHASH_SINGLE: u32 = 3;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Hard interpreter limits.
pub const MAX_SCRIPT_SIZE: usize = 10_000;
pub const MAX_PUSH_SIZE: usize = 4096;
pub const MAX_STACK_SIZE: usize = 1000;
pub const MAX_OPS_PER_SCRIPT: usize = 201;
pub const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;

fn is_disabled(op: u8) -> bool {
    matches!(
        op,
        OP_CAT | OP_SUBSTR | OP_LEFT | OP_RIGHT | OP_INVERT | OP_AND | OP_OR | OP_XOR
            | OP_2MUL | OP_2DIV | OP_MUL | OP_DIV | OP_MOD | OP_LSHIFT | OP_RSHIFT
    )
}

/// A serialized script.
#[derive(
    Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_opcode(&mut self, op: u8) -> &mut Self {
        self.0.push(op);
        self
    }

    /// Append a data push with the minimal push opcode for its length.
    pub fn push_data(&mut self, data: &[u8]) -> &mut Self {
        match data.len() {
            0 => {
                self.0.push(OP_0);
            }
            1..=0x4b => {
                self.0.push(data.len() as u8);
                self.0.extend_from_slice(data);
            }
            0x4c..=0xff => {
                self.0.push(OP_PUSHDATA1);
                self.0.push(data.len() as u8);
                self.0.extend_from_slice(data);
            }
            _ => {
                self.0.push(OP_PUSHDATA2);
                self.0.extend_from_slice(&(data.len() as u16).to_le_bytes());
                self.0.extend_from_slice(data);
            }
        }
        self
    }

    /// Append an integer using small-int opcodes where possible.
    pub fn push_int(&mut self, value: i64) -> &mut Self {
        match value {
            0 => {
                self.0.push(OP_0);
            }
            -1 => {
                self.0.push(OP_1NEGATE);
            }
            1..=16 => {
                self.0.push(OP_1 + (value as u8) - 1);
            }
            _ => {
                let encoded = num_encode(value);
                self.push_data(&encoded);
            }
        }
        self
    }

    /// Read the opcode at `*pc`, advancing past it and any pushed data.
    pub fn get_op(&self, pc: &mut usize) -> Result<(u8, Option<&[u8]>), ScriptError> {
        let bytes = &self.0;
        if *pc >= bytes.len() {
            return Err(ScriptError::BadScriptEncoding);
        }
        let op = bytes[*pc];
        *pc += 1;
        let len = match op {
            0x01..=0x4b => op as usize,
            OP_PUSHDATA1 => {
                let n = *bytes.get(*pc).ok_or(ScriptError::BadScriptEncoding)? as usize;
                *pc += 1;
                n
            }
            OP_PUSHDATA2 => {
                if *pc + 2 > bytes.len() {
                    return Err(ScriptError::BadScriptEncoding);
                }
                let n = u16::from_le_bytes([bytes[*pc], bytes[*pc + 1]]) as usize;
                *pc += 2;
                n
            }
            OP_PUSHDATA4 => {
                if *pc + 4 > bytes.len() {
                    return Err(ScriptError::BadScriptEncoding);
                }
                let n = u32::from_le_bytes([
                    bytes[*pc],
                    bytes[*pc + 1],
                    bytes[*pc + 2],
                    bytes[*pc + 3],
                ]) as usize;
                *pc += 4;
                n
            }
            _ => return Ok((op, None)),
        };
        if *pc + len > bytes.len() {
            return Err(ScriptError::BadScriptEncoding);
        }
        let data = &bytes[*pc..*pc + len];
        *pc += len;
        Ok((op, Some(data)))
    }

    /// Count legacy signature operations: CHECKSIG counts one,
    /// CHECKMULTISIG twenty. Malformed tails count what was parsed.
    pub fn sig_op_count(&self) -> usize {
        let mut pc = 0;
        let mut count = 0;
        while pc < self.0.len() {
            let Ok((op, _)) = self.get_op(&mut pc) else { break };
            match op {
                OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => count += 20,
                _ => {}
            }
        }
        count
    }

    /// OP_RETURN-led scripts can never be satisfied.
    pub fn is_provably_unspendable(&self) -> bool {
        !self.0.is_empty() && self.0[0] == OP_RETURN || self.0.len() > MAX_SCRIPT_SIZE
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Minimal encoding of a script number (little-endian sign-magnitude).
pub fn num_encode(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if out.last().unwrap() & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0 });
    } else if negative {
        *out.last_mut().unwrap() |= 0x80;
    }
    out
}

/// Decode a script number, enforcing the 4-byte operand cap.
pub fn num_decode(bytes: &[u8]) -> Result<i64, ScriptError> {
    if bytes.len() > 4 {
        return Err(ScriptError::NumberOverflow);
    }
    if bytes.is_empty() {
        return Ok(0);
    }
    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        value |= (*b as i64) << (8 * i);
    }
    if bytes.last().unwrap() & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        value = -(value & mask);
    }
    Ok(value)
}

/// Truthiness of a stack element: any nonzero byte, except negative zero.
pub fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, b) in bytes.iter().enumerate() {
        if *b != 0 {
            return !(i == bytes.len() - 1 && *b == 0x80);
        }
    }
    false
}

/// Transaction context handed to CHECKSIG operations.
#[derive(Clone, Copy)]
pub struct TxSigContext<'a> {
    pub tx: &'a Transaction,
    pub in_idx: usize,
}

/// Compute the hash that CHECKSIG signs.
///
/// All scriptSigs are blanked, the subscript is inserted at the signed
/// input, the SIGHASH modifiers blank outputs and other inputs, and the
/// hash type is appended as a 4-byte little-endian suffix before double
/// SHA-256.
pub fn signature_hash(
    script_code: &Script,
    tx: &Transaction,
    in_idx: usize,
    hash_type: u32,
) -> Hash256 {
    if in_idx >= tx.vin.len() {
        return one_hash();
    }

    let mut tx_copy = tx.clone();
    for input in &mut tx_copy.vin {
        input.script_sig = Script::new();
    }
    tx_copy.vin[in_idx].script_sig = script_code.clone();

    match hash_type & 0x1f {
        SIGHASH_NONE => {
            tx_copy.vout.clear();
            for (i, input) in tx_copy.vin.iter_mut().enumerate() {
                if i != in_idx {
                    input.sequence = 0;
                }
            }
        }
        SIGHASH_SINGLE => {
            if in_idx >= tx_copy.vout.len() {
                return one_hash();
            }
            tx_copy.vout.truncate(in_idx + 1);
            for output in tx_copy.vout.iter_mut().take(in_idx) {
                output.value = -1;
                output.script_pubkey = Script::new();
            }
            for (i, input) in tx_copy.vin.iter_mut().enumerate() {
                if i != in_idx {
                    input.sequence = 0;
                }
            }
        }
        _ => {}
    }

    if hash_type & SIGHASH_ANYONECANPAY != 0 {
        let signed = tx_copy.vin[in_idx].clone();
        tx_copy.vin = vec![signed];
    }

    let mut data = crate::ser::serialize(&tx_copy);
    data.extend_from_slice(&hash_type.to_le_bytes());
    sha256d(&data)
}

fn one_hash() -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 1;
    Hash256(bytes)
}

/// Remove every op whose full encoding equals the push of `data`.
fn find_and_delete(script: &Script, data: &[u8]) -> Script {
    let mut pattern = Script::new();
    pattern.push_data(data);
    let pattern = pattern.as_bytes();

    let mut out = Vec::with_capacity(script.len());
    let bytes = script.as_bytes();
    let mut pc = 0;
    while pc < bytes.len() {
        let start = pc;
        if script.get_op(&mut pc).is_err() {
            out.extend_from_slice(&bytes[start..]);
            break;
        }
        let chunk = &bytes[start..pc];
        if chunk != pattern {
            out.extend_from_slice(chunk);
        }
    }
    Script::from_bytes(out)
}

fn check_sig_op(
    sig_and_type: &[u8],
    pubkey: &[u8],
    script_code: &Script,
    ctx: &TxSigContext<'_>,
) -> bool {
    if sig_and_type.is_empty() {
        return false;
    }
    let (sig, type_byte) = sig_and_type.split_at(sig_and_type.len() - 1);
    let hash_type = type_byte[0] as u32;
    let digest = signature_hash(script_code, ctx.tx, ctx.in_idx, hash_type);
    verify_signature(pubkey, sig, &digest)
}

/// Execute one script on the given stack.
///
/// `ctx` supplies the transaction for CHECKSIG; without it any signature
/// check fails (used only by standalone predicate tests).
pub fn eval_script(
    stack: &mut Vec<Vec<u8>>,
    script: &Script,
    ctx: Option<&TxSigContext<'_>>,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }

    let mut alt_stack: Vec<Vec<u8>> = Vec::new();
    let mut exec_stack: Vec<bool> = Vec::new();
    let mut op_count = 0usize;
    let mut pc = 0usize;
    let mut last_codesep = 0usize;

    macro_rules! popv {
        () => {
            stack.pop().ok_or(ScriptError::InvalidStackOperation)?
        };
    }
    macro_rules! popn {
        () => {
            num_decode(&popv!())?
        };
    }

    while pc < script.len() {
        let exec = exec_stack.iter().all(|b| *b);
        let (op, data) = script.get_op(&mut pc)?;

        if let Some(data) = data {
            if data.len() > MAX_PUSH_SIZE {
                return Err(ScriptError::PushSize);
            }
            if exec {
                stack.push(data.to_vec());
            }
            if stack.len() + alt_stack.len() > MAX_STACK_SIZE {
                return Err(ScriptError::StackSize);
            }
            continue;
        }

        if op > OP_16 {
            op_count += 1;
            if op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::OpCount);
            }
        }

        if is_disabled(op) {
            return Err(ScriptError::DisabledOpcode(op));
        }

        if !exec && !matches!(op, OP_IF | OP_NOTIF | OP_ELSE | OP_ENDIF | OP_VERIF | OP_VERNOTIF) {
            continue;
        }

        match op {
            OP_0 => stack.push(Vec::new()),
            OP_1NEGATE => stack.push(num_encode(-1)),
            OP_1..=OP_16 => stack.push(num_encode((op - OP_1 + 1) as i64)),

            OP_NOP | OP_NOP1..=OP_NOP10 => {}

            OP_VER | OP_VERIF | OP_VERNOTIF | OP_RESERVED | OP_RESERVED1 | OP_RESERVED2 => {
                return Err(ScriptError::BadOpcode(op));
            }

            OP_IF | OP_NOTIF => {
                let mut value = false;
                if exec {
                    value = cast_to_bool(&popv!());
                    if op == OP_NOTIF {
                        value = !value;
                    }
                }
                exec_stack.push(value);
            }
            OP_ELSE => {
                let top = exec_stack.last_mut().ok_or(ScriptError::UnbalancedConditional)?;
                *top = !*top;
            }
            OP_ENDIF => {
                exec_stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
            }
            OP_VERIFY => {
                if !cast_to_bool(&popv!()) {
                    return Err(ScriptError::VerifyFailed);
                }
            }
            OP_RETURN => return Err(ScriptError::OpReturn),

            OP_TOALTSTACK => alt_stack.push(popv!()),
            OP_FROMALTSTACK => {
                stack.push(alt_stack.pop().ok_or(ScriptError::InvalidStackOperation)?)
            }
            OP_2DROP => {
                popv!();
                popv!();
            }
            OP_2DUP => {
                let n = stack.len();
                if n < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.push(stack[n - 2].clone());
                stack.push(stack[n - 1].clone());
            }
            OP_3DUP => {
                let n = stack.len();
                if n < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.push(stack[n - 3].clone());
                stack.push(stack[n - 2].clone());
                stack.push(stack[n - 1].clone());
            }
            OP_2OVER => {
                let n = stack.len();
                if n < 4 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.push(stack[n - 4].clone());
                stack.push(stack[n - 3].clone());
            }
            OP_2ROT => {
                let n = stack.len();
                if n < 6 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let a = stack.remove(n - 6);
                let b = stack.remove(n - 6);
                stack.push(a);
                stack.push(b);
            }
            OP_2SWAP => {
                let n = stack.len();
                if n < 4 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.swap(n - 4, n - 2);
                stack.swap(n - 3, n - 1);
            }
            OP_IFDUP => {
                let top = stack.last().ok_or(ScriptError::InvalidStackOperation)?;
                if cast_to_bool(top) {
                    stack.push(top.clone());
                }
            }
            OP_DEPTH => {
                let depth = stack.len() as i64;
                stack.push(num_encode(depth));
            }
            OP_DROP => {
                popv!();
            }
            OP_DUP => {
                let top = stack.last().ok_or(ScriptError::InvalidStackOperation)?.clone();
                stack.push(top);
            }
            OP_NIP => {
                let n = stack.len();
                if n < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.remove(n - 2);
            }
            OP_OVER => {
                let n = stack.len();
                if n < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.push(stack[n - 2].clone());
            }
            OP_PICK | OP_ROLL => {
                let depth = popn!();
                if depth < 0 || depth as usize >= stack.len() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let idx = stack.len() - 1 - depth as usize;
                if op == OP_ROLL {
                    let item = stack.remove(idx);
                    stack.push(item);
                } else {
                    stack.push(stack[idx].clone());
                }
            }
            OP_ROT => {
                let n = stack.len();
                if n < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let item = stack.remove(n - 3);
                stack.push(item);
            }
            OP_SWAP => {
                let n = stack.len();
                if n < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.swap(n - 2, n - 1);
            }
            OP_TUCK => {
                let n = stack.len();
                if n < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let top = stack[n - 1].clone();
                stack.insert(n - 2, top);
            }
            OP_SIZE => {
                let len = stack.last().ok_or(ScriptError::InvalidStackOperation)?.len();
                stack.push(num_encode(len as i64));
            }

            OP_EQUAL | OP_EQUALVERIFY => {
                let b = popv!();
                let a = popv!();
                let equal = a == b;
                if op == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    stack.push(encode_bool(equal));
                }
            }

            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let n = popn!();
                let result = match op {
                    OP_1ADD => n + 1,
                    OP_1SUB => n - 1,
                    OP_NEGATE => -n,
                    OP_ABS => n.abs(),
                    OP_NOT => (n == 0) as i64,
                    _ => (n != 0) as i64,
                };
                stack.push(num_encode(result));
            }
            OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                let b = popn!();
                let a = popn!();
                let result = match op {
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_BOOLAND => (a != 0 && b != 0) as i64,
                    OP_BOOLOR => (a != 0 || b != 0) as i64,
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => (a == b) as i64,
                    OP_NUMNOTEQUAL => (a != b) as i64,
                    OP_LESSTHAN => (a < b) as i64,
                    OP_GREATERTHAN => (a > b) as i64,
                    OP_LESSTHANOREQUAL => (a <= b) as i64,
                    OP_GREATERTHANOREQUAL => (a >= b) as i64,
                    OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                if op == OP_NUMEQUALVERIFY {
                    if result == 0 {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    stack.push(num_encode(result));
                }
            }
            OP_WITHIN => {
                let max = popn!();
                let min = popn!();
                let x = popn!();
                stack.push(encode_bool(min <= x && x < max));
            }

            OP_RIPEMD160 => {
                let data = popv!();
                let digest: [u8; 20] = ripemd::Ripemd160::digest(&data).into();
                stack.push(digest.to_vec());
            }
            OP_SHA1 => {
                let data = popv!();
                let digest: [u8; 20] = Sha1::digest(&data).into();
                stack.push(digest.to_vec());
            }
            OP_SHA256 => {
                let data = popv!();
                let digest: [u8; 32] = Sha256::digest(&data).into();
                stack.push(digest.to_vec());
            }
            OP_HASH160 => {
                let data = popv!();
                stack.push(hash160(&data).to_vec());
            }
            OP_HASH256 => {
                let data = popv!();
                stack.push(sha256d(&data).0.to_vec());
            }
            OP_CODESEPARATOR => last_codesep = pc,

            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pubkey = popv!();
                let sig = popv!();
                let ctx = ctx.ok_or(ScriptError::EvalFalse)?;
                let code = Script::from_bytes(script.as_bytes()[last_codesep..].to_vec());
                let code = find_and_delete(&code, &sig);
                let ok = check_sig_op(&sig, &pubkey, &code, ctx);
                if op == OP_CHECKSIGVERIFY {
                    if !ok {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    stack.push(encode_bool(ok));
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let key_count = popn!();
                if !(0..=MAX_PUBKEYS_PER_MULTISIG).contains(&key_count) {
                    return Err(ScriptError::SigCount);
                }
                op_count += key_count as usize;
                if op_count > MAX_OPS_PER_SCRIPT {
                    return Err(ScriptError::OpCount);
                }
                let mut keys = Vec::with_capacity(key_count as usize);
                for _ in 0..key_count {
                    keys.push(popv!());
                }
                let sig_count = popn!();
                if sig_count < 0 || sig_count > key_count {
                    return Err(ScriptError::SigCount);
                }
                let mut sigs = Vec::with_capacity(sig_count as usize);
                for _ in 0..sig_count {
                    sigs.push(popv!());
                }
                // The historical off-by-one: one extra element is consumed.
                popv!();

                let ctx = ctx.ok_or(ScriptError::EvalFalse)?;
                let mut code = Script::from_bytes(script.as_bytes()[last_codesep..].to_vec());
                for sig in &sigs {
                    code = find_and_delete(&code, sig);
                }

                let mut ok = true;
                let mut key_iter = keys.into_iter();
                'sigs: for sig in &sigs {
                    loop {
                        match key_iter.next() {
                            Some(key) => {
                                if check_sig_op(sig, &key, &code, ctx) {
                                    continue 'sigs;
                                }
                            }
                            None => {
                                ok = false;
                                break 'sigs;
                            }
                        }
                    }
                }

                if op == OP_CHECKMULTISIGVERIFY {
                    if !ok {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    stack.push(encode_bool(ok));
                }
            }

            _ => return Err(ScriptError::BadOpcode(op)),
        }

        if stack.len() + alt_stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }

    if !exec_stack.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }
    Ok(())
}

fn encode_bool(b: bool) -> Vec<u8> {
    if b { vec![1] } else { Vec::new() }
}

/// Run `script_sig` then `script_pubkey` on one stack; the predicate holds
/// iff the final stack top is truthy.
pub fn verify_script(
    script_sig: &Script,
    script_pubkey: &Script,
    tx: &Transaction,
    in_idx: usize,
) -> Result<(), ScriptError> {
    let ctx = TxSigContext { tx, in_idx };
    let mut stack: Vec<Vec<u8>> = Vec::new();
    eval_script(&mut stack, script_sig, Some(&ctx))?;
    eval_script(&mut stack, script_pubkey, Some(&ctx))?;
    match stack.last() {
        Some(top) if cast_to_bool(top) => Ok(()),
        _ => Err(ScriptError::EvalFalse),
    }
}

/// A decoded name operation prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameScript {
    pub op: NameOp,
    pub args: Vec<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameOp {
    New,
    FirstUpdate,
    Update,
}

impl NameScript {
    /// The name being operated on. `None` for name_new, which carries only
    /// a hash commitment.
    pub fn name(&self) -> Option<&[u8]> {
        match self.op {
            NameOp::New => None,
            _ => Some(&self.args[0]),
        }
    }

    /// The value (the move JSON) carried by firstupdate/update.
    pub fn value(&self) -> Option<&[u8]> {
        match self.op {
            NameOp::New => None,
            NameOp::FirstUpdate => Some(self.args.last().unwrap()),
            NameOp::Update => Some(&self.args[1]),
        }
    }

    /// The rand commitment of an old-style firstupdate.
    pub fn rand(&self) -> Option<&[u8]> {
        match self.op {
            NameOp::FirstUpdate if self.args.len() == 3 => Some(&self.args[1]),
            _ => None,
        }
    }

    /// The hash commitment of a name_new.
    pub fn new_hash(&self) -> Option<&[u8]> {
        match self.op {
            NameOp::New => Some(&self.args[0]),
            _ => None,
        }
    }
}

/// Decode the name-operation prefix of a script, if present and well
/// formed: a small-integer opcode, pushed arguments, then the DROP/NOP
/// run separating the prefix from the ordinary predicate.
pub fn decode_name_script(script: &Script) -> Option<NameScript> {
    let mut pc = 0;
    let (first, data) = script.get_op(&mut pc).ok()?;
    if data.is_some() || !(OP_1..=OP_16).contains(&first) {
        return None;
    }
    let op_num = first - OP_1 + 1;

    let mut args = Vec::new();
    loop {
        let (op, data) = script.get_op(&mut pc).ok()?;
        match data {
            Some(bytes) => args.push(bytes.to_vec()),
            None if op == OP_0 => args.push(Vec::new()),
            None if matches!(op, OP_DROP | OP_2DROP | OP_NOP) => break,
            None => return None,
        }
    }

    let op = match (op_num, args.len()) {
        (1, 1) => NameOp::New,
        (2, 2) | (2, 3) => NameOp::FirstUpdate,
        (3, 2) => NameOp::Update,
        _ => return None,
    };
    Some(NameScript { op, args })
}

/// Strip the name prefix, returning the ordinary predicate part.
///
/// Returns the script unchanged when no prefix is present.
pub fn remove_name_script_prefix(script: &Script) -> Script {
    if decode_name_script(script).is_none() {
        return script.clone();
    }
    let mut pc = 0;
    let _ = script.get_op(&mut pc);
    let mut rest_start = pc;
    loop {
        let prev = pc;
        match script.get_op(&mut pc) {
            Ok((op, None)) if matches!(op, OP_DROP | OP_2DROP | OP_NOP) => {
                rest_start = pc;
            }
            Ok((_, Some(_))) => {}
            Ok(_) => {
                rest_start = prev;
                break;
            }
            Err(_) => break,
        }
        if pc >= script.len() {
            break;
        }
    }
    Script::from_bytes(script.as_bytes()[rest_start..].to_vec())
}

/// Classification of an output script for standardness and indexing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptType {
    PubKey(Vec<u8>),
    PubKeyHash([u8; 20]),
    Name(NameScript),
    Tag(Vec<u8>),
    NonStandard,
}

/// Solve an output script into its standard template, if any.
pub fn classify(script: &Script) -> ScriptType {
    if let Some(name) = decode_name_script(script) {
        return ScriptType::Name(name);
    }

    let bytes = script.as_bytes();

    // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
    if bytes.len() == 25
        && bytes[0] == OP_DUP
        && bytes[1] == OP_HASH160
        && bytes[2] == 20
        && bytes[23] == OP_EQUALVERIFY
        && bytes[24] == OP_CHECKSIG
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[3..23]);
        return ScriptType::PubKeyHash(hash);
    }

    // <pubkey> OP_CHECKSIG
    if (bytes.len() == 35 && bytes[0] == 33 || bytes.len() == 67 && bytes[0] == 65)
        && bytes[bytes.len() - 1] == OP_CHECKSIG
    {
        return ScriptType::PubKey(bytes[1..bytes.len() - 1].to_vec());
    }

    // OP_RETURN <bytes>
    if !bytes.is_empty() && bytes[0] == OP_RETURN {
        let mut pc = 1;
        if pc == bytes.len() {
            return ScriptType::Tag(Vec::new());
        }
        if let Ok((_, Some(data))) = script.get_op(&mut pc) {
            if pc == bytes.len() {
                return ScriptType::Tag(data.to_vec());
            }
        }
        return ScriptType::NonStandard;
    }

    ScriptType::NonStandard
}

/// Standardness of a whole output: standard template, and tag outputs
/// must be short and lock a minimum amount.
pub fn is_standard_txout(txout: &TxOut) -> bool {
    match classify(&txout.script_pubkey) {
        ScriptType::PubKey(_) | ScriptType::PubKeyHash(_) => true,
        ScriptType::Name(_) => {
            // The predicate after the name prefix must itself be standard.
            let rest = remove_name_script_prefix(&txout.script_pubkey);
            matches!(classify(&rest), ScriptType::PubKey(_) | ScriptType::PubKeyHash(_))
        }
        ScriptType::Tag(data) => {
            data.len() <= OPRETURN_MAX_STRLEN && txout.value >= OPRETURN_MIN_LOCKED
        }
        ScriptType::NonStandard => false,
    }
}

/// Extract the destination hash160 of an output, looking through name
/// prefixes and pay-to-pubkey.
pub fn extract_destination(script: &Script) -> Option<[u8; 20]> {
    let stripped = remove_name_script_prefix(script);
    match classify(&stripped) {
        ScriptType::PubKeyHash(hash) => Some(hash),
        ScriptType::PubKey(pubkey) => Some(hash160(&pubkey)),
        _ => None,
    }
}

/// Build a pay-to-pubkey-hash script.
pub fn p2pkh_script(hash: &[u8; 20]) -> Script {
    let mut script = Script::new();
    script
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_data(hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG);
    script
}

/// Build a pay-to-pubkey script.
pub fn p2pk_script(pubkey: &[u8]) -> Script {
    let mut script = Script::new();
    script.push_data(pubkey).push_opcode(OP_CHECKSIG);
    script
}

/// `OP_NAME_NEW <hash160(rand ‖ name)> OP_2DROP` + payment predicate.
pub fn name_new_script(commitment: &[u8; 20], dest: &[u8; 20]) -> Script {
    let mut script = Script::new();
    script
        .push_opcode(OP_NAME_NEW)
        .push_data(commitment)
        .push_opcode(OP_2DROP);
    append(script, p2pkh_script(dest))
}

/// Old-style `OP_NAME_FIRSTUPDATE <name> <rand> <value> OP_2DROP OP_2DROP`.
pub fn name_firstupdate_script_old(
    name: &[u8],
    rand: &[u8],
    value: &[u8],
    dest: &[u8; 20],
) -> Script {
    let mut script = Script::new();
    script
        .push_opcode(OP_NAME_FIRSTUPDATE)
        .push_data(name)
        .push_data(rand)
        .push_data(value)
        .push_opcode(OP_2DROP)
        .push_opcode(OP_2DROP);
    append(script, p2pkh_script(dest))
}

/// New-style `OP_NAME_FIRSTUPDATE <name> <value> OP_2DROP OP_DROP`.
pub fn name_firstupdate_script(name: &[u8], value: &[u8], dest: &[u8; 20]) -> Script {
    let mut script = Script::new();
    script
        .push_opcode(OP_NAME_FIRSTUPDATE)
        .push_data(name)
        .push_data(value)
        .push_opcode(OP_2DROP)
        .push_opcode(OP_DROP);
    append(script, p2pkh_script(dest))
}

/// `OP_NAME_UPDATE <name> <value> OP_2DROP OP_DROP` + payment predicate.
pub fn name_update_script(name: &[u8], value: &[u8], dest: &[u8; 20]) -> Script {
    let mut script = Script::new();
    script
        .push_opcode(OP_NAME_UPDATE)
        .push_data(name)
        .push_data(value)
        .push_opcode(OP_2DROP)
        .push_opcode(OP_DROP);
    append(script, p2pkh_script(dest))
}

fn append(mut head: Script, tail: Script) -> Script {
    let mut bytes = std::mem::take(&mut head).0;
    bytes.extend_from_slice(tail.as_bytes());
    Script::from_bytes(bytes)
}
