//! Consensus hash primitives: SHA-256d, HASH160, and the scrypt PoW hash.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256, the hash of txids, block headers, and checksums.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    Hash256(Sha256::digest(first).into())
}

/// RIPEMD-160 of SHA-256, used for addresses and P2PKH scripts.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// scrypt(N=1024, r=1, p=1) over the 80-byte header, salted with itself.
///
/// This is the Litecoin-style PoW hash used by the scrypt mining algorithm.
pub fn scrypt_pow(data: &[u8]) -> Hash256 {
    let params = scrypt::Params::new(10, 1, 1, 32).expect("static scrypt params are valid");
    let mut out = [0u8; 32];
    scrypt::scrypt(data, data, &params, &mut out).expect("output length is fixed at 32");
    Hash256(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_known_vector() {
        // sha256d("") = 5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456
        let h = sha256d(b"");
        assert_eq!(
            hex::encode(h.0),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn hash160_known_vector() {
        // hash160("") = b472a266d0bd89c13706a4132ccfb16f7c3b9fcb
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn scrypt_pow_deterministic() {
        let header = [7u8; 80];
        assert_eq!(scrypt_pow(&header), scrypt_pow(&header));
        assert_ne!(scrypt_pow(&header), scrypt_pow(&[8u8; 80]));
    }

    #[test]
    fn hashes_differ_between_primitives() {
        let data = b"huntercoin";
        assert_ne!(sha256d(data).0, sha256(data));
    }
}
