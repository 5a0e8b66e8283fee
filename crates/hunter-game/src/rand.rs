//! Consensus random number generator, seeded from the block hash.
//!
//! The generator keeps a 256-bit state. Each draw divides the state by the
//! modulus and returns the remainder, so one seed yields a long sequence
//! of small numbers; when too few bits remain the base state is rehashed.
//! Every node stepping the same block derives the identical sequence.

use primitive_types::U256;

use hunter_core::hashing::sha256d;
use hunter_core::types::Hash256;

/// Rehash floor: the compact-encoded value 0x097FFFFF, i.e. `0x7FFFFF`
/// shifted 48 bits up. Below this, most of the state's entropy is spent.
fn min_state() -> U256 {
    U256::from(0x7f_ffffu64) << 48
}

/// The game RNG. Construction and every draw are pure.
#[derive(Clone, Debug)]
pub struct GameRng {
    state: U256,
    state0: U256,
}

impl GameRng {
    /// Seed from a block hash: the initial state is the double SHA-256 of
    /// the hash bytes, read as a little-endian 256-bit integer.
    pub fn new(seed: &Hash256) -> Self {
        let state0 = U256::from_little_endian(sha256d(seed.as_bytes()).as_bytes());
        Self { state: state0, state0 }
    }

    /// Uniform draw in `[0, modulo)`.
    ///
    /// The state is divided by the modulus after taking the remainder;
    /// when it drops below the rehash floor, the base state is rehashed
    /// and the walk continues from there.
    pub fn get_int_rnd(&mut self, modulo: i64) -> i64 {
        debug_assert!(modulo > 0);
        if self.state < min_state() {
            let mut bytes = [0u8; 32];
            self.state0.to_little_endian(&mut bytes);
            self.state0 = U256::from_little_endian(sha256d(&bytes).as_bytes());
            self.state = self.state0;
        }
        let m = U256::from(modulo as u64);
        let remainder = self.state % m;
        self.state /= m;
        remainder.low_u64() as i64
    }
}
