//! Base58Check address encoding.
//!
//! A Huntercoin address is `base58check(version_byte || hash160)` with the
//! classic double-SHA256 checksum. Mainnet uses version byte 40 ('H'
//! prefix), testnet 100.

use thiserror::Error;

use crate::constants::Network;
use crate::hashing::sha256d;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("base58 decode failed")] InvalidBase58,
    #[error("payload length {0} is not 21 bytes")] InvalidLength(usize),
    #[error("checksum mismatch")] InvalidChecksum,
    #[error("unknown version byte {0}")] UnknownVersion(u8),
}

/// Encode a 20-byte pubkey hash as an address for the given network.
pub fn hash160_to_address(network: Network, hash: &[u8; 20]) -> String {
    encode_base58check(network.address_version(), hash)
}

/// Decode an address into its version byte and pubkey hash.
pub fn decode_address(addr: &str) -> Result<(u8, [u8; 20]), AddressError> {
    let raw = bs58::decode(addr)
        .into_vec()
        .map_err(|_| AddressError::InvalidBase58)?;
    if raw.len() != 25 {
        return Err(AddressError::InvalidLength(raw.len().saturating_sub(4)));
    }
    let (payload, checksum) = raw.split_at(21);
    let expected = &sha256d(payload).0[..4];
    if checksum != expected {
        return Err(AddressError::InvalidChecksum);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Ok((payload[0], hash))
}

/// Decode an address, requiring it to belong to the given network.
pub fn address_to_hash160(network: Network, addr: &str) -> Result<[u8; 20], AddressError> {
    let (version, hash) = decode_address(addr)?;
    if version != network.address_version() {
        return Err(AddressError::UnknownVersion(version));
    }
    Ok(hash)
}

/// Whether a string parses as a well-formed address on any known network.
pub fn is_valid_address(addr: &str) -> bool {
    match decode_address(addr) {
        Ok((version, _)) => {
            version == Network::Mainnet.address_version()
                || version == Network::Testnet.address_version()
        }
        Err(_) => false,
    }
}

fn encode_base58check(version: u8, hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(version);
    payload.extend_from_slice(hash);
    let checksum = sha256d(&payload);
    payload.extend_from_slice(&checksum.0[..4]);
    bs58::encode(payload).into_string()
}
