//! # hunter-core
//! Foundation types, wire codec, script VM, and validation for Huntercoin.

pub mod address;
pub mod auxpow;
pub mod constants;
pub mod error;
pub mod genesis;
pub mod hashing;
pub mod keys;
pub mod mempool;
pub mod merkle;
pub mod names;
pub mod pow;
pub mod script;
pub mod ser;
pub mod types;
pub mod utxo;
pub mod validation;
