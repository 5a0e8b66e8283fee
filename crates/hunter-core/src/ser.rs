//! Explicit wire (de)serialisation for on-chain types.
//!
//! Integers are little-endian, vector lengths are Bitcoin compact-size
//! varints, and hashes are raw 32-byte digests. Every consensus type gets a
//! hand-written implementation; there is no derive magic here because the
//! exact byte layout is consensus-critical.
//!
//! Decoding is strict: non-canonical varints, truncated input, and trailing
//! bytes are all errors.

use crate::auxpow::{AuxPow, ParentBlockHeader};
use crate::error::SerError;
use crate::script::Script;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxIn, TxOut};

/// Maximum element count accepted for any decoded vector. Bounds memory
/// allocation before the block-size check gets a chance to run.
const MAX_VEC_LEN: u64 = 1 << 22;

pub trait Encodable {
    fn encode_to(&self, out: &mut Vec<u8>);
}

pub trait Decodable: Sized {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError>;
}

/// Serialize a value to its wire bytes.
pub fn serialize<T: Encodable + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode_to(&mut out);
    out
}

/// Deserialize a value, requiring the input to be consumed exactly.
pub fn deserialize<T: Decodable>(data: &[u8]) -> Result<T, SerError> {
    let mut r = Reader::new(data);
    let value = T::decode_from(&mut r)?;
    if r.remaining() != 0 {
        return Err(SerError::TrailingBytes(r.remaining()));
    }
    Ok(value)
}

/// Cursor over a byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], SerError> {
        if self.remaining() < n {
            return Err(SerError::UnexpectedEof(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, SerError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, SerError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, SerError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, SerError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32, SerError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, SerError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

/// Write a Bitcoin compact-size length prefix.
pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xFC => out.push(n as u8),
        0xFD..=0xFFFF => {
            out.push(0xFD);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.push(0xFE);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xFF);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Read a compact-size prefix, rejecting non-canonical encodings.
pub fn read_compact_size(r: &mut Reader<'_>) -> Result<u64, SerError> {
    let tag = r.read_u8()?;
    let n = match tag {
        0xFD => {
            let v = r.read_u16()? as u64;
            if v < 0xFD {
                return Err(SerError::NonCanonicalVarint);
            }
            v
        }
        0xFE => {
            let v = r.read_u32()? as u64;
            if v <= 0xFFFF {
                return Err(SerError::NonCanonicalVarint);
            }
            v
        }
        0xFF => {
            let v = r.read_u64()?;
            if v <= 0xFFFF_FFFF {
                return Err(SerError::NonCanonicalVarint);
            }
            v
        }
        _ => tag as u64,
    };
    Ok(n)
}

fn read_vec_len(r: &mut Reader<'_>) -> Result<usize, SerError> {
    let len = read_compact_size(r)?;
    if len > MAX_VEC_LEN {
        return Err(SerError::OversizedLength { len, max: MAX_VEC_LEN });
    }
    Ok(len as usize)
}

impl Encodable for Hash256 {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

impl Decodable for Hash256 {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        Ok(Hash256(r.take(32)?.try_into().unwrap()))
    }
}

impl Encodable for Vec<u8> {
    fn encode_to(&self, out: &mut Vec<u8>) {
        write_compact_size(out, self.len() as u64);
        out.extend_from_slice(self);
    }
}

impl Decodable for Vec<u8> {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        let len = read_vec_len(r)?;
        Ok(r.take(len)?.to_vec())
    }
}

impl Encodable for Script {
    fn encode_to(&self, out: &mut Vec<u8>) {
        write_compact_size(out, self.as_bytes().len() as u64);
        out.extend_from_slice(self.as_bytes());
    }
}

impl Decodable for Script {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        let len = read_vec_len(r)?;
        Ok(Script::from_bytes(r.take(len)?.to_vec()))
    }
}

impl Encodable for OutPoint {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.txid.encode_to(out);
        out.extend_from_slice(&self.n.to_le_bytes());
    }
}

impl Decodable for OutPoint {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        Ok(OutPoint { txid: Hash256::decode_from(r)?, n: r.read_u32()? })
    }
}

impl Encodable for TxIn {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.prevout.encode_to(out);
        self.script_sig.encode_to(out);
        out.extend_from_slice(&self.sequence.to_le_bytes());
    }
}

impl Decodable for TxIn {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        Ok(TxIn {
            prevout: OutPoint::decode_from(r)?,
            script_sig: Script::decode_from(r)?,
            sequence: r.read_u32()?,
        })
    }
}

impl Encodable for TxOut {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        self.script_pubkey.encode_to(out);
    }
}

impl Decodable for TxOut {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        Ok(TxOut { value: r.read_i64()?, script_pubkey: Script::decode_from(r)? })
    }
}

impl Encodable for Transaction {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        write_compact_size(out, self.vin.len() as u64);
        for input in &self.vin {
            input.encode_to(out);
        }
        write_compact_size(out, self.vout.len() as u64);
        for output in &self.vout {
            output.encode_to(out);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }
}

impl Decodable for Transaction {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        let version = r.read_i32()?;
        let nin = read_vec_len(r)?;
        let mut vin = Vec::with_capacity(nin.min(1024));
        for _ in 0..nin {
            vin.push(TxIn::decode_from(r)?);
        }
        let nout = read_vec_len(r)?;
        let mut vout = Vec::with_capacity(nout.min(1024));
        for _ in 0..nout {
            vout.push(TxOut::decode_from(r)?);
        }
        Ok(Transaction { version, vin, vout, lock_time: r.read_u32()? })
    }
}

impl Encodable for ParentBlockHeader {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.prefix_bytes());
    }
}

impl Decodable for ParentBlockHeader {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        Ok(ParentBlockHeader {
            version: r.read_i32()?,
            prev_hash: Hash256::decode_from(r)?,
            merkle_root: Hash256::decode_from(r)?,
            time: r.read_u32()?,
            bits: r.read_u32()?,
            nonce: r.read_u32()?,
        })
    }
}

impl Encodable for AuxPow {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.coinbase_tx.encode_to(out);
        self.parent_block_hash.encode_to(out);
        write_compact_size(out, self.coinbase_branch.len() as u64);
        for h in &self.coinbase_branch {
            h.encode_to(out);
        }
        out.extend_from_slice(&self.coinbase_index.to_le_bytes());
        write_compact_size(out, self.blockchain_branch.len() as u64);
        for h in &self.blockchain_branch {
            h.encode_to(out);
        }
        out.extend_from_slice(&self.chain_index.to_le_bytes());
        self.parent_header.encode_to(out);
    }
}

impl Decodable for AuxPow {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        let coinbase_tx = Transaction::decode_from(r)?;
        let parent_block_hash = Hash256::decode_from(r)?;
        let ncb = read_vec_len(r)?;
        let mut coinbase_branch = Vec::with_capacity(ncb.min(64));
        for _ in 0..ncb {
            coinbase_branch.push(Hash256::decode_from(r)?);
        }
        let coinbase_index = r.read_u32()?;
        let nbc = read_vec_len(r)?;
        let mut blockchain_branch = Vec::with_capacity(nbc.min(64));
        for _ in 0..nbc {
            blockchain_branch.push(Hash256::decode_from(r)?);
        }
        let chain_index = r.read_u32()?;
        let parent_header = ParentBlockHeader::decode_from(r)?;
        Ok(AuxPow {
            coinbase_tx,
            parent_block_hash,
            coinbase_branch,
            coinbase_index,
            blockchain_branch,
            chain_index,
            parent_header,
        })
    }
}

impl Encodable for BlockHeader {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.prefix_bytes());
        if self.has_auxpow_bit() {
            if let Some(aux) = &self.aux_pow {
                aux.encode_to(out);
            }
        }
    }
}

impl Decodable for BlockHeader {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        let version = r.read_i32()?;
        let prev_hash = Hash256::decode_from(r)?;
        let tx_merkle_root = Hash256::decode_from(r)?;
        let game_merkle_root = Hash256::decode_from(r)?;
        let time = r.read_u32()?;
        let bits = r.read_u32()?;
        let nonce = r.read_u32()?;
        let aux_pow = if version & crate::types::BLOCK_VERSION_AUXPOW != 0 {
            Some(Box::new(AuxPow::decode_from(r)?))
        } else {
            None
        };
        Ok(BlockHeader {
            version,
            prev_hash,
            tx_merkle_root,
            game_merkle_root,
            time,
            bits,
            nonce,
            aux_pow,
        })
    }
}

impl Encodable for Block {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.header.encode_to(out);
        write_compact_size(out, self.vtx.len() as u64);
        for tx in &self.vtx {
            tx.encode_to(out);
        }
        write_compact_size(out, self.vgametx.len() as u64);
        for tx in &self.vgametx {
            tx.encode_to(out);
        }
    }
}

impl Decodable for Block {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, SerError> {
        let header = BlockHeader::decode_from(r)?;
        let ntx = read_vec_len(r)?;
        let mut vtx = Vec::with_capacity(ntx.min(1024));
        for _ in 0..ntx {
            vtx.push(Transaction::decode_from(r)?);
        }
        let ngame = read_vec_len(r)?;
        let mut vgametx = Vec::with_capacity(ngame.min(1024));
        for _ in 0..ngame {
            vgametx.push(Transaction::decode_from(r)?);
        }
        Ok(Block { header, vtx, vgametx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BLOCK_VERSION_AUXPOW, OutPoint};

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn::new(
                OutPoint::new(Hash256([0x42; 32]), 7),
                Script::from_bytes(vec![1, 2, 3]),
            )],
            vout: vec![TxOut {
                value: 123_456_789,
                script_pubkey: Script::from_bytes(vec![0x76, 0xA9]),
            }],
            lock_time: 99,
        }
    }

    #[test]
    fn compact_size_boundaries() {
        for n in [0u64, 1, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, 0x1_0000_0000] {
            let mut buf = Vec::new();
            write_compact_size(&mut buf, n);
            let mut r = Reader::new(&buf);
            assert_eq!(read_compact_size(&mut r).unwrap(), n);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn compact_size_rejects_non_canonical() {
        // 0x05 encoded with the 0xFD form.
        let buf = [0xFD, 0x05, 0x00];
        let mut r = Reader::new(&buf);
        assert_eq!(read_compact_size(&mut r), Err(SerError::NonCanonicalVarint));
    }

    #[test]
    fn transaction_roundtrip() {
        let tx = sample_tx();
        let bytes = serialize(&tx);
        let decoded: Transaction = deserialize(&bytes).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = serialize(&sample_tx());
        bytes.push(0);
        assert!(matches!(
            deserialize::<Transaction>(&bytes),
            Err(SerError::TrailingBytes(1)),
        ));
    }

    #[test]
    fn truncated_input_rejected() {
        let bytes = serialize(&sample_tx());
        assert!(deserialize::<Transaction>(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn header_roundtrip_without_auxpow() {
        let header = BlockHeader {
            version: 1,
            prev_hash: Hash256([1; 32]),
            tx_merkle_root: Hash256([2; 32]),
            game_merkle_root: Hash256([3; 32]),
            time: 1000,
            bits: 0x1d00ffff,
            nonce: 5,
            aux_pow: None,
        };
        let bytes = serialize(&header);
        assert_eq!(bytes.len(), 112);
        let decoded: BlockHeader = deserialize(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_roundtrip_with_auxpow() {
        let aux = AuxPow {
            coinbase_tx: sample_tx(),
            parent_block_hash: Hash256([9; 32]),
            coinbase_branch: vec![Hash256([1; 32]), Hash256([2; 32])],
            coinbase_index: 0,
            blockchain_branch: vec![],
            chain_index: 0,
            parent_header: ParentBlockHeader {
                version: 2,
                prev_hash: Hash256([4; 32]),
                merkle_root: Hash256([5; 32]),
                time: 77,
                bits: 0x1e0fffff,
                nonce: 3,
            },
        };
        let header = BlockHeader {
            version: 1 | BLOCK_VERSION_AUXPOW,
            prev_hash: Hash256([1; 32]),
            tx_merkle_root: Hash256([2; 32]),
            game_merkle_root: Hash256([3; 32]),
            time: 1000,
            bits: 0x1d00ffff,
            nonce: 5,
            aux_pow: Some(Box::new(aux)),
        };
        let decoded: BlockHeader = deserialize(&serialize(&header)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn block_roundtrip_with_game_txs(){
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256::ZERO,
                tx_merkle_root: Hash256([2; 32]),
                game_merkle_root: Hash256([3; 32]),
                time: 1,
                bits: 0x1d00ffff,
                nonce: 0,
            aux_pow: None,
            },
            vtx: vec![sample_tx()],
            vgametx: vec![sample_tx()],
        };
        let decoded: Block = deserialize(&serialize(&block)).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn oversized_vector_length_rejected() {
        // A tx claiming 2^32 inputs.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(0xFF);
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            deserialize::<Transaction>(&bytes),
            Err(SerError::OversizedLength { .. }),
        ));
    }
}
