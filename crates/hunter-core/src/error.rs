//! Error types for the Huntercoin protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerError {
    #[error("unexpected end of data at byte {0}")] UnexpectedEof(usize),
    #[error("trailing bytes after decode: {0}")] TrailingBytes(usize),
    #[error("non-canonical compact size")] NonCanonicalVarint,
    #[error("length {len} exceeds limit {max}")] OversizedLength { len: u64, max: u64 },
    #[error("invalid value for field {0}")] InvalidValue(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script longer than 10000 bytes")] ScriptSize,
    #[error("push larger than 4096 bytes")] PushSize,
    #[error("more than 201 non-push opcodes")] OpCount,
    #[error("stack size limit exceeded")] StackSize,
    #[error("disabled opcode 0x{0:02x}")] DisabledOpcode(u8),
    #[error("unknown opcode 0x{0:02x}")] BadOpcode(u8),
    #[error("unbalanced conditional")] UnbalancedConditional,
    #[error("OP_VERIFY failed")] VerifyFailed,
    #[error("OP_RETURN executed")] OpReturn,
    #[error("operation on too few stack elements")] InvalidStackOperation,
    #[error("numeric operand longer than 4 bytes")] NumberOverflow,
    #[error("pubkey or signature count out of range")] SigCount,
    #[error("script evaluated to false")] EvalFalse,
    #[error("malformed script encoding")] BadScriptEncoding,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("oversized: {size} > {max}")] Oversized { size: usize, max: usize },
    #[error("output value out of range")] ValueOutOfRange,
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("null prevout in non-coinbase input {0}")] NullPrevout(usize),
    #[error("coinbase scriptSig length {0} outside [2, 230]")] BadCoinbaseLength(usize),
    #[error("game transaction not accepted on the wire")] GameTxOnWire,
    #[error("missing inputs: {0}")] MissingInputs(String),
    #[error("immature {kind} spend at depth {depth}")] Immature { kind: &'static str, depth: i32 },
    #[error("script verification failed on input {index}: {source}")]
    BadScript { index: usize, source: ScriptError },
    #[error("inputs {value_in} below outputs {value_out}")]
    InsufficientFunds { value_in: i64, value_out: i64 },
    #[error("fee {fee} below required {required}")] InsufficientFee { fee: i64, required: i64 },
    #[error("name rule violation: {0}")] NameRuleViolation(String),
    #[error("invalid game move: {0}")] InvalidMove(String),
    #[error("value overflow")] ValueOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("proof of work below target")] InvalidPoW,
    #[error("bad auxpow: {0}")] BadAuxPow(String),
    #[error("auxpow bit does not match auxpow presence")] AuxPowMismatch,
    #[error("block timestamp not after median")] TimestampTooEarly,
    #[error("block timestamp too far in the future")] TimestampTooFar,
    #[error("first transaction is not coinbase")] FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("no transactions")] Empty,
    #[error("duplicate txid: {0}")] DuplicateTxid(String),
    #[error("tx merkle root mismatch")] BadMerkleRoot,
    #[error("game merkle root mismatch")] BadGameMerkleRoot,
    #[error("sig-op count {0} exceeds limit")] SigOpsExceeded(usize),
    #[error("oversized: {size} > {max}")] Oversized { size: usize, max: usize },
    #[error("incorrect difficulty bits: got {got:#x}, expected {expected:#x}")]
    BadBits { got: u32, expected: u32 },
    #[error("unknown parent block {0}")] UnknownParent(String),
    #[error("coinbase pays {got}, limit {max}")] BadCoinbaseValue { got: i64, max: i64 },
    #[error("tx {index}: {source}")] Tx { index: usize, source: TransactionError },
    #[error("game step failed: {0}")] GameStep(String),
    #[error("duplicate name update in block: {0}")] DuplicateNameInBlock(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] AlreadyExists(String),
    #[error("conflicts with pool tx {existing} on outpoint {outpoint}")]
    Conflict { existing: String, outpoint: String },
    #[error("coinbase not allowed in pool")] Coinbase,
    #[error("non-standard transaction")] NonStandard,
    #[error("undersized transaction: {0} bytes")] Undersized(usize),
    #[error("too many sig-ops for size")] TooManySigOps,
    #[error("free transaction rate limited")] RateLimited,
    #[error("pending name operation for {0}")] PendingName(String),
    #[error(transparent)] Tx(#[from] TransactionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("utxo already present: {0}")] UtxoExists(String),
    #[error("utxo not found: {0}")] UtxoMissing(String),
    #[error("name entry not found: {0} at height {1}")] NameEntryMissing(String, i32),
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("transaction not found: {0}")] TxNotFound(String),
    #[error("game state not found at height {0}")] GameStateMissing(i32),
    #[error("no common ancestor between {0} and {1}")] NoCommonAncestor(String, String),
    #[error("branch rejected: {0}")] InvalidBranch(String),
    #[error("storage: {0}")] Storage(String),
    #[error("node is warming up")] Warmup,
    #[error("shutdown requested")] Shutdown,
}

#[derive(Error, Debug)]
pub enum HunterError {
    #[error(transparent)] Ser(#[from] SerError),
    #[error(transparent)] Script(#[from] ScriptError),
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] Chain(#[from] ChainError),
}
