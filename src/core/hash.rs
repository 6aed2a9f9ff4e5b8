// Hashing utilities

use sha2::{Sha256, Digest};
use crate::core::Hash256;

/// SHA256 double hash
/// hash256 = SHA256(SHA256(data))
pub fn hash256(data: &[u8]) -> Hash256 {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);
    let mut result = [0u8; 32];
    result.copy_from_slice(&second_hash);
    Hash256::new(result)
}

/// Digest binding a nonce to a proof-of-work challenge
pub fn pow_digest(challenge: &Hash256, nonce: u64) -> Hash256 {
    let mut buf = Vec::with_capacity(40);
    buf.extend_from_slice(challenge.as_bytes());
    buf.extend_from_slice(&nonce.to_le_bytes());
    hash256(&buf)
}
