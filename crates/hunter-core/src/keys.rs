//! secp256k1 ECDSA keys and signatures.
//!
//! Signatures on the wire are DER-encoded with a one-byte sighash type
//! appended; that byte is stripped by the script interpreter before the
//! signature reaches [`verify_signature`].

use std::fmt;
use std::sync::LazyLock;

use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, Secp256k1, SecretKey};

use crate::hashing::hash160;
use crate::types::Hash256;

static SECP: LazyLock<Secp256k1<All>> = LazyLock::new(Secp256k1::new);

/// A secp256k1 keypair for signing transaction inputs.
pub struct KeyPair {
    secret: SecretKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self { secret: SecretKey::new(&mut rand::thread_rng()) }
    }

    /// Create a keypair from 32-byte secret key material.
    ///
    /// Returns `None` for out-of-range scalars (zero or >= the curve order).
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Option<Self> {
        SecretKey::from_slice(&bytes).ok().map(|secret| Self { secret })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.secret.public_key(&SECP))
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    /// Sign a 32-byte digest, returning the DER-encoded signature.
    pub fn sign(&self, digest: &Hash256) -> Vec<u8> {
        let msg = Message::from_digest(*digest.as_bytes());
        SECP.sign_ecdsa(&msg, &self.secret).serialize_der().to_vec()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self { secret: self.secret }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// A secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// Parse a compressed (33-byte) or uncompressed (65-byte) public key.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        secp256k1::PublicKey::from_slice(bytes).ok().map(Self)
    }

    /// Compressed SEC1 serialization.
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0.serialize()
    }

    /// HASH160 of the serialized key, as used in P2PKH outputs.
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.to_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

/// Verify a DER signature over a 32-byte digest.
///
/// Returns `false` for malformed keys or signatures; consensus treats all
/// of those the same as a failed check.
pub fn verify_signature(pubkey: &[u8], sig_der: &[u8], digest: &Hash256) -> bool {
    let Ok(pk) = secp256k1::PublicKey::from_slice(pubkey) else {
        return false;
    };
    let Ok(mut sig) = Signature::from_der_lax(sig_der) else {
        return false;
    };
    sig.normalize_s();
    let msg = Message::from_digest(*digest.as_bytes());
    SECP.verify_ecdsa(&msg, &sig, &pk).is_ok()
}
