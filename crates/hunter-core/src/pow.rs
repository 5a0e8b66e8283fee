//! Proof-of-work targets and the per-algorithm difficulty retarget.
//!
//! Targets travel in the compact `bits` encoding (exponent byte plus a
//! 23-bit mantissa). Each mining algorithm retargets independently over
//! its own blocks using the ppcoin-style exponential moving average; the
//! two algorithms share one emission schedule, so the target spacing is
//! `60 * NUM_ALGOS` seconds per algorithm.

use primitive_types::U256;

use crate::constants::Network;
use crate::error::BlockError;
use crate::types::{BlockHeader, Hash256, NUM_ALGOS, PowAlgo};

/// Blocks-per-retarget window of the EMA formula.
pub const RETARGET_INTERVAL: i64 = 2016;
/// Target seconds between blocks of one algorithm.
pub const TARGET_SPACING: i64 = 60 * NUM_ALGOS as i64;

/// Decode a compact target. Returns zero for a zero mantissa and caps the
/// exponent so the shift cannot overflow.
pub fn compact_to_target(bits: u32) -> U256 {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;
    if mantissa == 0 {
        return U256::zero();
    }
    let mantissa = U256::from(mantissa);
    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else if exponent <= 32 {
        // 23 mantissa bits shifted at most 232: never leaves 256 bits.
        mantissa << (8 * (exponent - 3))
    } else {
        U256::MAX
    }
}

/// Encode a target in compact form (the inverse of [`compact_to_target`]
/// up to mantissa truncation).
pub fn target_to_compact(target: U256) -> u32 {
    if target.is_zero() {
        return 0;
    }
    let bits_used = 256 - target.leading_zeros() as usize;
    let mut exponent = bits_used.div_ceil(8);
    let mut mantissa = if exponent <= 3 {
        (target << (8 * (3 - exponent))).low_u32()
    } else {
        (target >> (8 * (exponent - 3))).low_u32()
    };
    // Keep the sign bit of the mantissa clear.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }
    ((exponent as u32) << 24) | mantissa
}

/// The easiest permitted target per algorithm and network. Scrypt hashes
/// are far cheaper per unit of work, so its floor is much higher.
pub fn pow_limit(network: Network, algo: PowAlgo) -> U256 {
    match (network, algo) {
        (Network::Mainnet, PowAlgo::Sha256d) => U256::MAX >> 32,
        (Network::Mainnet, PowAlgo::Scrypt) => U256::MAX >> 20,
        (Network::Testnet, PowAlgo::Sha256d) => U256::MAX >> 24,
        (Network::Testnet, PowAlgo::Scrypt) => U256::MAX >> 12,
        // Regtest accepts roughly every other hash.
        (Network::Regtest, _) => U256::MAX >> 1,
    }
}

/// Interpret a hash as a big-endian 256-bit number for target comparison.
///
/// Digests are little-endian on the wire, so the byte order is reversed.
pub fn hash_to_u256(hash: &Hash256) -> U256 {
    U256::from_little_endian(hash.as_bytes())
}

/// Check a header's proof of work against its own claimed `bits`.
///
/// For auxpow blocks the parent header is hashed; the auxpow commitment
/// chain itself is checked by [`crate::auxpow::AuxPow::check`].
pub fn check_proof_of_work(header: &BlockHeader, network: Network) -> Result<(), BlockError> {
    let algo = header.algo();
    let target = compact_to_target(header.bits);
    if target.is_zero() || target > pow_limit(network, algo) {
        return Err(BlockError::InvalidPoW);
    }
    let pow_hash = match &header.aux_pow {
        Some(aux) => aux.parent_header.pow_hash(algo),
        None => header.pow_hash(),
    };
    if hash_to_u256(&pow_hash) > target {
        return Err(BlockError::InvalidPoW);
    }
    Ok(())
}

/// The two most recent blocks of one algorithm, as seen from the chain tip.
#[derive(Clone, Copy, Debug)]
pub struct AlgoAncestors {
    /// `(bits, time)` of the latest same-algo block.
    pub prev: (u32, u32),
    /// Time of the same-algo block before that.
    pub prev_prev_time: u32,
}

/// Compute the required `bits` for the next block of `algo`.
///
/// `ancestors` is `None` until two same-algo blocks exist, in which case
/// the initial target applies. The EMA moves the previous target toward
/// the observed spacing:
/// `new = prev * ((N-1)*T + 2*actual) / ((N+1)*T)`.
pub fn next_work_required(
    network: Network,
    algo: PowAlgo,
    ancestors: Option<AlgoAncestors>,
) -> u32 {
    let limit = pow_limit(network, algo);
    let Some(AlgoAncestors { prev: (prev_bits, prev_time), prev_prev_time }) = ancestors else {
        return target_to_compact(limit);
    };

    let actual_spacing = (prev_time as i64) - (prev_prev_time as i64);
    let n = RETARGET_INTERVAL;
    let t = TARGET_SPACING;
    // The numerator can go negative under timestamp manipulation; floor it
    // at one so the target stays positive.
    let numerator = ((n - 1) * t + 2 * actual_spacing).max(1);
    let denominator = (n + 1) * t;

    let prev_target = compact_to_target(prev_bits);
    let mut new_target = prev_target / U256::from(denominator as u64);
    new_target = new_target.saturating_mul(U256::from(numerator as u64));
    if new_target > limit {
        new_target = limit;
    }
    target_to_compact(new_target)
}

/// Work contributed by a block: `2^256 / (target + 1)`, boosted 12 bits
/// for scrypt to reflect its higher per-hash cost. The boost only breaks
/// ties between branches; it never affects validity.
pub fn block_work(bits: u32, algo: PowAlgo) -> U256 {
    let target = compact_to_target(bits);
    if target.is_zero() {
        return U256::zero();
    }
    // 2^256 / (target+1) == (~target / (target+1)) + 1 in 256-bit space.
    let work = (!target / (target + U256::one())) + U256::one();
    match algo {
        PowAlgo::Sha256d => work,
        PowAlgo::Scrypt => work << 12,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BLOCK_VERSION_SCRYPT;

    #[test]
    fn compact_roundtrip_common_values() {
        for bits in [0x1d00ffffu32, 0x1c0fffff, 0x1b0404cb, 0x207fffff] {
            let target = compact_to_target(bits);
            assert_eq!(target_to_compact(target), bits, "bits {bits:#x}");
        }
    }

    #[test]
    fn compact_zero_mantissa_is_zero() {
        assert!(compact_to_target(0x1d000000).is_zero());
        assert_eq!(target_to_compact(U256::zero()), 0);
    }

    #[test]
    fn known_genesis_target() {
        // 0x1d00ffff is the classic ~(2^224) Bitcoin limit.
        let target = compact_to_target(0x1d00ffff);
        assert_eq!(target, U256::from(0xffffu64) << 208);
    }

    #[test]
    fn limits_ordered_by_cost() {
        assert!(
            pow_limit(Network::Mainnet, PowAlgo::Scrypt)
                > pow_limit(Network::Mainnet, PowAlgo::Sha256d)
        );
        assert!(
            pow_limit(Network::Testnet, PowAlgo::Sha256d)
                > pow_limit(Network::Mainnet, PowAlgo::Sha256d)
        );
    }

    #[test]
    fn initial_target_is_the_limit() {
        let bits = next_work_required(Network::Mainnet, PowAlgo::Sha256d, None);
        assert_eq!(compact_to_target(bits), {
            // Compact encoding truncates the mantissa.
            compact_to_target(target_to_compact(pow_limit(Network::Mainnet, PowAlgo::Sha256d)))
        });
    }

    #[test]
    fn slow_blocks_raise_target() {
        let prev_bits = 0x1c0fffff;
        let fast = next_work_required(
            Network::Mainnet,
            PowAlgo::Sha256d,
            Some(AlgoAncestors { prev: (prev_bits, 1000 + 10), prev_prev_time: 1000 }),
        );
        let slow = next_work_required(
            Network::Mainnet,
            PowAlgo::Sha256d,
            Some(AlgoAncestors { prev: (prev_bits, 1000 + 1000), prev_prev_time: 1000 }),
        );
        assert!(compact_to_target(slow) > compact_to_target(fast));
    }

    #[test]
    fn on_schedule_spacing_barely_moves_target() {
        let prev_bits = 0x1c0fffff;
        let next = next_work_required(
            Network::Mainnet,
            PowAlgo::Sha256d,
            Some(AlgoAncestors {
                prev: (prev_bits, 1000 + TARGET_SPACING as u32),
                prev_prev_time: 1000,
            }),
        );
        let prev_target = compact_to_target(prev_bits);
        let next_target = compact_to_target(next);
        let diff = if next_target > prev_target {
            next_target - prev_target
        } else {
            prev_target - next_target
        };
        assert!(diff < prev_target / U256::from(500u64));
    }

    #[test]
    fn retarget_clamps_to_limit() {
        let limit_bits = target_to_compact(pow_limit(Network::Mainnet, PowAlgo::Sha256d));
        let next = next_work_required(
            Network::Mainnet,
            PowAlgo::Sha256d,
            Some(AlgoAncestors { prev: (limit_bits, 1_000_000), prev_prev_time: 0 }),
        );
        assert!(compact_to_target(next) <= pow_limit(Network::Mainnet, PowAlgo::Sha256d));
    }

    #[test]
    fn negative_spacing_does_not_panic_or_zero() {
        let next = next_work_required(
            Network::Mainnet,
            PowAlgo::Sha256d,
            Some(AlgoAncestors { prev: (0x1c0fffff, 1000), prev_prev_time: 2_000_000 }),
        );
        assert!(!compact_to_target(next).is_zero());
    }

    #[test]
    fn work_is_inverse_of_target() {
        let easy = block_work(0x207fffff, PowAlgo::Sha256d);
        let hard = block_work(0x1c0fffff, PowAlgo::Sha256d);
        assert!(hard > easy);
    }

    #[test]
    fn scrypt_work_boosted() {
        let sha = block_work(0x1c0fffff, PowAlgo::Sha256d);
        let scrypt = block_work(0x1c0fffff, PowAlgo::Scrypt);
        assert_eq!(scrypt, sha << 12);
    }

    #[test]
    fn check_pow_rejects_above_limit_bits() {
        let header = BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            tx_merkle_root: Hash256::ZERO,
            game_merkle_root: Hash256::ZERO,
            time: 0,
            bits: 0x21008000, // far above any limit
            nonce: 0,
            aux_pow: None,
        };
        assert_eq!(check_proof_of_work(&header, Network::Mainnet), Err(BlockError::InvalidPoW));
    }

    #[test]
    fn check_pow_scrypt_vs_sha_differ() {
        // The same header bytes hash differently under the two algorithms,
        // so algorithm choice is consensus-relevant.
        let mut header = BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            tx_merkle_root: Hash256::ZERO,
            game_merkle_root: Hash256::ZERO,
            time: 7,
            bits: 0x1d00ffff,
            nonce: 1,
            aux_pow: None,
        };
        let sha_hash = header.pow_hash();
        header.version |= BLOCK_VERSION_SCRYPT;
        let scrypt_hash = header.pow_hash();
        assert_ne!(sha_hash, scrypt_hash);
    }
}
